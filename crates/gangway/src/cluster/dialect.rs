use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::strutils::sh_quote;

/// Scheduler family installed on a target. `Cloud` covers bare VMs where
/// jobs run as forked processes without a batch scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerDialect {
    Pbs,
    Slurm,
    Sge,
    Lsf,
    Cloud,
}

impl fmt::Display for SchedulerDialect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SchedulerDialect::Pbs => "pbs",
            SchedulerDialect::Slurm => "slurm",
            SchedulerDialect::Sge => "sge",
            SchedulerDialect::Lsf => "lsf",
            SchedulerDialect::Cloud => "cloud",
        };
        f.write_str(name)
    }
}

/// Command templates for one scheduler installation. Binaries are resolved
/// against `installed_path` so targets with nonstandard prefixes work.
#[derive(Debug, Clone)]
pub struct JobManagerConfiguration {
    pub dialect: SchedulerDialect,
    installed_path: String,
}

impl JobManagerConfiguration {
    pub fn new(dialect: SchedulerDialect, installed_path: impl Into<String>) -> Self {
        let mut installed_path = installed_path.into();
        if !installed_path.is_empty() && !installed_path.ends_with('/') {
            installed_path.push('/');
        }
        Self {
            dialect,
            installed_path,
        }
    }

    fn bin(&self, name: &str) -> String {
        format!("{}{name}", self.installed_path)
    }

    /// Submission command for an uploaded script. Cloud targets fork the
    /// script with `nohup` and report the PID as the job id.
    pub fn submit_command(&self, script_path: &str) -> String {
        let script = sh_quote(script_path);
        match self.dialect {
            SchedulerDialect::Pbs => format!("{} {script}", self.bin("qsub")),
            SchedulerDialect::Slurm => format!("{} {script}", self.bin("sbatch")),
            SchedulerDialect::Sge => format!("{} {script}", self.bin("qsub")),
            SchedulerDialect::Lsf => format!("{} < {script}", self.bin("bsub")),
            SchedulerDialect::Cloud => {
                format!("nohup {script} > /dev/null 2>&1 & echo $!")
            }
        }
    }

    pub fn cancel_command(&self, job_id: &str) -> String {
        let id = sh_quote(job_id);
        match self.dialect {
            SchedulerDialect::Pbs => format!("{} {id}", self.bin("qdel")),
            SchedulerDialect::Slurm => format!("{} {id}", self.bin("scancel")),
            SchedulerDialect::Sge => format!("{} {id}", self.bin("qdel")),
            SchedulerDialect::Lsf => format!("{} {id}", self.bin("bkill")),
            SchedulerDialect::Cloud => format!("kill -9 {id}"),
        }
    }

    /// Status query for a single job id.
    pub fn monitor_command(&self, job_id: &str) -> String {
        let id = sh_quote(job_id);
        match self.dialect {
            SchedulerDialect::Pbs => format!("{} -f -F json -x {id}", self.bin("qstat")),
            SchedulerDialect::Slurm => format!("{} show job {id}", self.bin("scontrol")),
            SchedulerDialect::Sge => self.bin("qstat"),
            SchedulerDialect::Lsf => format!("{} {id}", self.bin("bjobs")),
            SchedulerDialect::Cloud => format!("ps -p {id} -o pid=,stat="),
        }
    }

    /// Status query for every job of one user, used for batched polling.
    pub fn user_monitor_command(&self, user: &str) -> String {
        let user = sh_quote(user);
        match self.dialect {
            SchedulerDialect::Pbs => format!("{} -u {user}", self.bin("qstat")),
            SchedulerDialect::Slurm => {
                format!("{} -u {user} -h -o \"%i %T\"", self.bin("squeue"))
            }
            SchedulerDialect::Sge => format!("{} -u {user}", self.bin("qstat")),
            SchedulerDialect::Lsf => format!("{} -u {user}", self.bin("bjobs")),
            SchedulerDialect::Cloud => format!("ps -u {user} -o pid=,stat="),
        }
    }

    /// Reverse lookup of a scheduler job id from the submitted job name, for
    /// recovering ids lost between submission and persistence.
    pub fn job_id_by_name_command(&self, job_name: &str, user: &str) -> String {
        let name = sh_quote(job_name);
        let user = sh_quote(user);
        match self.dialect {
            SchedulerDialect::Pbs | SchedulerDialect::Sge => {
                format!("{} -u {user}", self.bin("qstat"))
            }
            SchedulerDialect::Slurm => format!(
                "{} -u {user} -h -o \"%i %j\" -n {name}",
                self.bin("squeue")
            ),
            SchedulerDialect::Lsf => format!("{} -u {user} -J {name}", self.bin("bjobs")),
            SchedulerDialect::Cloud => format!("pgrep -u {user} -f {name}"),
        }
    }

    pub fn script_extension(&self) -> &'static str {
        match self.dialect {
            SchedulerDialect::Pbs => ".pbs",
            SchedulerDialect::Slurm => ".slurm",
            SchedulerDialect::Sge => ".sge",
            SchedulerDialect::Lsf => ".lsf",
            SchedulerDialect::Cloud => ".sh",
        }
    }
}

/// Resource request and payload of one batch job, rendered into a scheduler
/// script at staging time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSpec {
    pub job_name: String,
    pub executable: String,
    pub arguments: Vec<String>,
    pub working_dir: String,
    pub queue: Option<String>,
    pub node_count: u32,
    pub cpu_count: u32,
    pub wall_time: Duration,
    pub stdout_path: String,
    pub stderr_path: String,
    pub pre_commands: Vec<String>,
}

impl ScriptSpec {
    pub fn render(&self, dialect: SchedulerDialect) -> String {
        let mut script = String::from("#!/bin/bash\n");
        let wall = format_walltime(self.wall_time);
        match dialect {
            SchedulerDialect::Pbs => {
                script.push_str(&format!("#PBS -N {}\n", self.job_name));
                if let Some(queue) = &self.queue {
                    script.push_str(&format!("#PBS -q {queue}\n"));
                }
                script.push_str(&format!(
                    "#PBS -l select={}:ncpus={}\n",
                    self.node_count, self.cpu_count
                ));
                script.push_str(&format!("#PBS -l walltime={wall}\n"));
                script.push_str(&format!("#PBS -o {}\n", self.stdout_path));
                script.push_str(&format!("#PBS -e {}\n", self.stderr_path));
            }
            SchedulerDialect::Slurm => {
                script.push_str(&format!("#SBATCH --job-name={}\n", self.job_name));
                if let Some(queue) = &self.queue {
                    script.push_str(&format!("#SBATCH --partition={queue}\n"));
                }
                script.push_str(&format!("#SBATCH --nodes={}\n", self.node_count));
                script.push_str(&format!("#SBATCH --ntasks-per-node={}\n", self.cpu_count));
                script.push_str(&format!("#SBATCH --time={wall}\n"));
                script.push_str(&format!("#SBATCH --output={}\n", self.stdout_path));
                script.push_str(&format!("#SBATCH --error={}\n", self.stderr_path));
            }
            SchedulerDialect::Sge => {
                script.push_str(&format!("#$ -N {}\n", self.job_name));
                if let Some(queue) = &self.queue {
                    script.push_str(&format!("#$ -q {queue}\n"));
                }
                script.push_str(&format!("#$ -pe mpi {}\n", self.cpu_count));
                script.push_str(&format!("#$ -l h_rt={wall}\n"));
                script.push_str(&format!("#$ -o {}\n", self.stdout_path));
                script.push_str(&format!("#$ -e {}\n", self.stderr_path));
                script.push_str("#$ -S /bin/bash\n");
            }
            SchedulerDialect::Lsf => {
                script.push_str(&format!("#BSUB -J {}\n", self.job_name));
                if let Some(queue) = &self.queue {
                    script.push_str(&format!("#BSUB -q {queue}\n"));
                }
                script.push_str(&format!("#BSUB -n {}\n", self.cpu_count));
                script.push_str(&format!("#BSUB -W {}\n", format_minutes(self.wall_time)));
                script.push_str(&format!("#BSUB -o {}\n", self.stdout_path));
                script.push_str(&format!("#BSUB -e {}\n", self.stderr_path));
            }
            SchedulerDialect::Cloud => {}
        }
        script.push('\n');
        script.push_str(&format!("cd {}\n", sh_quote(&self.working_dir)));
        for command in &self.pre_commands {
            script.push_str(command);
            script.push('\n');
        }
        script.push_str(&self.executable);
        for argument in &self.arguments {
            script.push(' ');
            script.push_str(&sh_quote(argument));
        }
        if dialect == SchedulerDialect::Cloud {
            script.push_str(&format!(
                " > {} 2> {}",
                sh_quote(&self.stdout_path),
                sh_quote(&self.stderr_path)
            ));
        }
        script.push('\n');
        script
    }
}

fn format_walltime(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// LSF expects wall time as HH:MM.
fn format_minutes(duration: Duration) -> String {
    let minutes = duration.as_secs().div_ceil(60);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}
