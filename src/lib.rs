#![deny(
    missing_copy_implementations,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts
)]

pub mod config;
pub mod errors;

pub mod server_impl;

pub type AnyResult<T> = eyre::Result<T>;

/// Advertised to gateway scripts through `SERVER_SOFTWARE`.
pub const SOFTWARE: &str = "OxServe";

/// The only protocol version spoken, on the wire and through the gateway.
pub const HTTP_VERSION: &str = "HTTP/1.1";
