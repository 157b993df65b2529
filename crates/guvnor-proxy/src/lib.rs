// SPDX-License-Identifier: Apache-2.0

//! HTTP/HTTPS reverse proxy, certificate manager, management API, and
//! the server composer that wires them to the supervision runtime.

pub mod certs;
pub mod mgmt;
pub mod proxy;
pub mod server;

use std::net::SocketAddr;

use thiserror::Error;

pub use certs::{CertConfig, CertError, CertInfo, CertManager};
pub use mgmt::ManagementApi;
pub use proxy::Proxy;
pub use server::{cert_config_from, run, run_until, ServerPaths};

/// Errors produced by the proxy listeners and management API.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cert(#[from] CertError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
