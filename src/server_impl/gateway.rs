//! CGI-style script gateway: maps a request onto a child process whose stdin
//! is the request body and whose stdout is decoded as the HTTP response.

use std::io::{Seek, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use fnv::FnvHashMap;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use tokio::io::BufReader;
use tokio::process::Command;

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::server_impl::request::HttpRequest;
use crate::server_impl::response::{decode_response, HttpResponse};
use crate::{HTTP_VERSION, SOFTWARE};

/// Request headers forwarded into the child environment. Headers outside
/// this table are silently dropped from the environment, a documented
/// limitation of the gateway contract.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum GatewayHeader {
    #[strum(serialize = "Accept")]
    Accept,
    #[strum(serialize = "Connection")]
    Connection,
    #[strum(serialize = "Content-Length")]
    ContentLength,
    #[strum(serialize = "Content-Type")]
    ContentType,
    #[strum(serialize = "Cookie")]
    Cookie,
    #[strum(serialize = "Host")]
    Host,
    #[strum(serialize = "Pragma")]
    Pragma,
    #[strum(serialize = "Referer")]
    Referer,
    #[strum(serialize = "User-Agent")]
    UserAgent,
}

impl GatewayHeader {
    fn env_var(self) -> &'static str {
        match self {
            Self::Accept => "HTTP_ACCEPT",
            Self::Connection => "HTTP_CONNECTION",
            Self::ContentLength => "CONTENT_LENGTH",
            Self::ContentType => "CONTENT_TYPE",
            Self::Cookie => "HTTP_COOKIE",
            Self::Host => "HTTP_HOST",
            Self::Pragma => "HTTP_PRAGMA",
            Self::Referer => "HTTP_REFERER",
            Self::UserAgent => "HTTP_USER_AGENT",
        }
    }
}

/// Splits a request target into path and query string at the first `?`.
pub fn split_target(target: &str) -> (&str, &str) {
    match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    }
}

/// Resolves a request path to a script inside `workdir`.
///
/// The containment check runs on the canonicalized path (symlinks and `..`
/// resolved), never on the raw string; anything escaping the server root is
/// rejected. This is the security boundary of the whole server.
pub async fn resolve_script(target_path: &str, workdir: &Path) -> Result<PathBuf, ServerError> {
    let relative = target_path.trim_start_matches('/');

    let resolved = tokio::fs::canonicalize(workdir.join(relative))
        .await
        .map_err(|err| ServerError::Path(format!("{target_path}: {err}")))?;

    if !resolved.starts_with(workdir) {
        return Err(ServerError::Path(format!(
            "{} escapes the server root",
            resolved.display()
        )));
    }

    Ok(resolved)
}

/// Builds the environment overlay for a gateway script. The child inherits
/// the parent environment with these variables applied on top.
pub fn build_env(
    request: &HttpRequest,
    config: &ServerConfig,
    remote_addr: IpAddr,
    query: &str,
) -> FnvHashMap<&'static str, String> {
    let mut env = FnvHashMap::default();

    env.insert("REQUEST_METHOD", request.method.to_string());
    env.insert("SERVER_ADDR", config.host.clone());
    env.insert("SERVER_PORT", config.port.to_string());
    env.insert("SERVER_PROTOCOL", HTTP_VERSION.to_string());
    env.insert("SERVER_ROOT", config.workdir.display().to_string());
    env.insert("SERVER_SOFTWARE", SOFTWARE.to_string());
    env.insert("QUERY_STRING", query.to_string());
    env.insert("REMOTE_ADDR", remote_addr.to_string());

    for header in GatewayHeader::iter() {
        let name: &'static str = header.into();
        if let Some(value) = request.headers.get(name) {
            env.insert(header.env_var(), value.to_string());
        }
    }

    env
}

/// Spawns the script and decodes its stdout as an HTTP response.
///
/// The request body goes through an anonymous scratch file rather than a
/// pipe: scripts get real, seekable file-descriptor stdin semantics. The
/// file is created already unlinked, so it disappears on every exit path.
pub async fn invoke(
    script: &Path,
    env: FnvHashMap<&'static str, String>,
    body: &[u8],
) -> Result<HttpResponse, ServerError> {
    let mut scratch = tempfile::tempfile()?;
    scratch.write_all(body)?;
    scratch.flush()?;
    scratch.rewind()?;

    let mut child = Command::new(script)
        .envs(env)
        .stdin(Stdio::from(scratch))
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|err| {
            ServerError::Gateway(format!("failed to spawn {}: {err}", script.display()))
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ServerError::Gateway("child stdout was not captured".into()))?;

    let mut reader = BufReader::new(stdout);
    let response = decode_response(&mut reader)
        .await
        .map_err(|err| {
            ServerError::Gateway(format!("bad response from {}: {err}", script.display()))
        })?
        .ok_or_else(|| {
            ServerError::Gateway(format!("{} produced no output", script.display()))
        })?;

    child.wait().await?;

    Ok(response)
}

/// Runs one request through the gateway end to end.
pub async fn dispatch(
    request: &HttpRequest,
    config: &ServerConfig,
    remote_addr: IpAddr,
) -> Result<HttpResponse, ServerError> {
    let (path, query) = split_target(&request.target);
    let script = resolve_script(path, &config.workdir).await?;
    let env = build_env(request, config, remote_addr, query);

    invoke(&script, env, &request.body).await
}
