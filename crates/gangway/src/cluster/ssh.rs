use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::AuthResult;
use russh::keys::PrivateKeyWithHashAlg;
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::cluster::server::{AuthMethod, ServerInfo};
use crate::cluster::session::{
    CommandOutput, RemoteSession, SessionFactory, SessionOptions, with_timeout,
};
use crate::common::strutils::sh_quote;
use crate::{Error, Result};

/// Minimal russh client handler. Host keys are managed by the deployment,
/// not verified here.
struct ClientHandler;

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// SSH-backed [`RemoteSession`]: command execution over exec channels, file
/// operations over SFTP. Operations are serialized through the handle lock,
/// so one session never runs two remote commands concurrently.
pub struct SshSession {
    server: ServerInfo,
    options: SessionOptions,
    handle: Mutex<Option<russh::client::Handle<ClientHandler>>>,
}

impl SshSession {
    pub async fn connect(
        server: ServerInfo,
        auth: &AuthMethod,
        options: SessionOptions,
    ) -> Result<Self> {
        let config = Arc::new(russh::client::Config {
            keepalive_interval: options.keepalive,
            ..Default::default()
        });

        log::debug!(
            "Connecting to {} as {}",
            server.addr(),
            auth.username(&server.username)
        );
        let mut handle = with_timeout(options.connect_timeout, async {
            russh::client::connect(config, (server.host.as_str(), server.port), ClientHandler)
                .await
                .map_err(|e| {
                    Error::Connection(format!("SSH connect to {} failed: {e:#}", server.addr()))
                })
        })
        .await?;

        let username = auth.username(&server.username).to_string();
        let result = match auth {
            AuthMethod::Password { password, .. } => handle
                .authenticate_password(username.clone(), password.clone())
                .await
                .map_err(|e| auth_error(&server, &username, e))?,
            AuthMethod::PublicKey {
                private_key,
                passphrase,
            } => {
                let key = russh::keys::decode_secret_key(private_key, passphrase.as_deref())
                    .map_err(|e| Error::Credential(format!("Cannot decode private key: {e}")))?;
                let hash = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| auth_error(&server, &username, e))?
                    .flatten();
                handle
                    .authenticate_publickey(
                        username.clone(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash),
                    )
                    .await
                    .map_err(|e| auth_error(&server, &username, e))?
            }
            AuthMethod::None => handle
                .authenticate_none(username.clone())
                .await
                .map_err(|e| auth_error(&server, &username, e))?,
        };

        match result {
            AuthResult::Success => {}
            AuthResult::Failure { .. } => {
                return Err(Error::Connection(format!(
                    "Authentication rejected for {}@{}",
                    username,
                    server.addr()
                )));
            }
        }

        Ok(Self {
            server,
            options,
            handle: Mutex::new(Some(handle)),
        })
    }

    async fn exec_capture(&self, command: &str) -> Result<CommandOutput> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| Error::Connection("Session already closed".into()))?;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| self.conn_error("open exec channel", e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| self.conn_error("exec request", e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status as i32,
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        let _ = channel.eof().await;
        let _ = channel.close().await;

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn sftp(&self) -> Result<SftpSession> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| Error::Connection("Session already closed".into()))?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| self.conn_error("open SFTP channel", e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| self.conn_error("request SFTP subsystem", e))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| self.conn_error("start SFTP session", e))
    }

    fn conn_error(&self, context: &str, error: impl std::fmt::Display) -> Error {
        Error::Connection(format!("{context} on {} failed: {error}", self.server.addr()))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(&self, command: &str, workdir: Option<&str>) -> Result<CommandOutput> {
        let full_command = match workdir {
            Some(dir) => format!("cd {} && {command}", sh_quote(dir)),
            None => command.to_string(),
        };
        log::debug!(
            "Running remote command `{full_command}` on {}",
            self.server.addr()
        );
        with_timeout(self.options.command_timeout, self.exec_capture(&full_command)).await
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<()> {
        log::debug!("Uploading {} -> {remote}", local.display());
        with_timeout(self.options.transfer_timeout, async {
            let sftp = self.sftp().await?;
            let mut local_file = tokio::fs::File::open(local).await?;
            let flags = OpenFlags::WRITE
                .union(OpenFlags::CREATE)
                .union(OpenFlags::TRUNCATE);
            let mut remote_file = sftp
                .open_with_flags(remote, flags)
                .await
                .map_err(|e| self.conn_error("open remote file", e))?;
            tokio::io::copy(&mut local_file, &mut remote_file)
                .await
                .map_err(|e| self.conn_error("write remote file", e))?;
            remote_file
                .shutdown()
                .await
                .map_err(|e| self.conn_error("flush remote file", e))?;
            Ok(())
        })
        .await
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<()> {
        log::debug!("Downloading {remote} -> {}", local.display());
        with_timeout(self.options.transfer_timeout, async {
            let sftp = self.sftp().await?;
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut remote_file = sftp
                .open(remote)
                .await
                .map_err(|e| self.conn_error("open remote file", e))?;
            let mut local_file = tokio::fs::File::create(local).await?;
            tokio::io::copy(&mut remote_file, &mut local_file)
                .await
                .map_err(|e| self.conn_error("read remote file", e))?;
            local_file.flush().await?;
            Ok(())
        })
        .await
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        with_timeout(self.options.command_timeout, async {
            let sftp = self.sftp().await?;
            for dir in dir_chain(path) {
                match sftp.metadata(&dir).await {
                    Ok(meta) if meta.is_dir() => continue,
                    Ok(_) => {
                        return Err(Error::Generic(format!(
                            "Remote path {dir} exists but is not a directory"
                        )));
                    }
                    Err(_) => {
                        if sftp.create_dir(&dir).await.is_err() {
                            // Possibly raced with another flow; accept the
                            // directory if it exists now.
                            match sftp.metadata(&dir).await {
                                Ok(meta) if meta.is_dir() => {}
                                _ => {
                                    return Err(self.conn_error(
                                        "create remote directory",
                                        format!("cannot create {dir}"),
                                    ));
                                }
                            }
                        }
                    }
                }
            }
            Ok(())
        })
        .await
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        with_timeout(self.options.command_timeout, async {
            let sftp = self.sftp().await?;
            let entries = sftp
                .read_dir(path)
                .await
                .map_err(|e| self.conn_error("list remote directory", e))?;
            Ok(entries.map(|entry| entry.file_name()).collect())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            log::debug!("Closing session to {}", self.server.addr());
            handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| self.conn_error("disconnect", e))?;
        }
        Ok(())
    }
}

/// Opens [`SshSession`]s with a fixed set of options.
pub struct SshSessionFactory {
    options: SessionOptions,
}

impl SshSessionFactory {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    async fn open(
        &self,
        server: &ServerInfo,
        auth: &AuthMethod,
    ) -> Result<Box<dyn RemoteSession>> {
        let session = SshSession::connect(server.clone(), auth, self.options.clone()).await?;
        Ok(Box::new(session))
    }
}

fn auth_error(server: &ServerInfo, username: &str, error: impl std::fmt::Display) -> Error {
    Error::Connection(format!(
        "Authentication of {}@{} failed: {error}",
        username,
        server.addr()
    ))
}

/// Expands `/a/b/c` into the cumulative prefixes `/a`, `/a/b`, `/a/b/c`, so
/// missing parents are created in order.
fn dir_chain(path: &str) -> Vec<String> {
    let trimmed = path.trim_end_matches('/');
    let mut chain = Vec::new();
    let mut current = String::new();
    if trimmed.starts_with('/') {
        current.push('/');
    }
    for component in trimmed.split('/').filter(|c| !c.is_empty()) {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(component);
        chain.push(current.clone());
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::dir_chain;

    #[test]
    fn dir_chain_expands_absolute_paths() {
        assert_eq!(
            dir_chain("/scratch/user/job"),
            vec!["/scratch", "/scratch/user", "/scratch/user/job"]
        );
    }

    #[test]
    fn dir_chain_handles_trailing_slash_and_relative_paths() {
        assert_eq!(dir_chain("work/dir/"), vec!["work", "work/dir"]);
        assert_eq!(dir_chain("/"), Vec::<String>::new());
    }
}
