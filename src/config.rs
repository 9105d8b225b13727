//! Listening address and server root, fixed for the process lifetime.

use std::path::PathBuf;

use clap::Parser;
use eyre::WrapErr;

use crate::AnyResult;

#[derive(Debug, Parser)]
#[command(name = "oxserve", version, about = "HTTP server gatewaying requests to executables")]
pub struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Root directory gateway scripts are resolved against.
    /// Defaults to the current directory.
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

impl Args {
    pub fn into_config(self) -> AnyResult<ServerConfig> {
        let workdir = match self.workdir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        // the path-safety check compares canonical paths, so the root itself
        // must be canonical
        let workdir = workdir
            .canonicalize()
            .wrap_err("workdir must be an existing directory")?;

        Ok(ServerConfig {
            host: self.host,
            port: self.port,
            workdir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workdir: PathBuf,
}
