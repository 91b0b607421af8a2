//! Multicast DNS / DNS-SD engine: transport, admission security, a one-shot
//! querier, and a probing/announcing responder. See [`new_querier`] and
//! [`new_responder`] for the top-level entry points.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod clock;
pub mod demux;
pub mod error;
pub mod metrics;
pub mod querier;
pub mod responder;
pub mod security;
pub mod transport;

use std::sync::Arc;

pub use clock::{Clock, RealClock};
pub use error::{AdmissionDrop, Error};
pub use metrics::Metrics;
pub use querier::{Querier, QuerierOptions};
pub use responder::{Responder, ResponderOptions, ServiceHandle};
pub use security::SecurityOptions;
pub use transport::Interface;

/// Options shared by [`new_querier`] and [`new_responder`] for selecting
/// and joining network interfaces.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Interfaces to bind; `None` uses [`transport::default_interfaces`].
    pub interfaces: Option<Vec<Interface>>,
    pub security: SecurityOptions,
    pub responder: ResponderOptions,
}

/// Binds the shared transport, joins the mDNS multicast group, and returns a
/// [`Querier`] for issuing one-shot queries. The returned transport's
/// cancellation token is also used by [`new_responder`] if the two share
/// the same process; each call to this function owns an independent
/// socket.
///
/// # Errors
///
/// If no interface can join the multicast group, or the socket cannot be
/// created.
pub async fn new_querier(options: EngineOptions) -> Result<Querier, Error> {
    let (transport, demux, _query_rx, _metrics) = bind_and_demux_with_queries(options).await?;
    Ok(Querier::new(transport, demux, QuerierOptions::default()))
}

/// Binds the shared transport, joins the mDNS multicast group, and returns a
/// [`Responder`] ready to [`Responder::register`] services on.
///
/// # Errors
///
/// If no interface can join the multicast group, or the socket cannot be
/// created.
pub async fn new_responder(options: EngineOptions) -> Result<Responder, Error> {
    let responder_options = options.responder.clone();
    let (transport, demux, query_rx, metrics) = bind_and_demux_with_queries(options).await?;
    Ok(Responder::spawn(
        transport,
        demux,
        Arc::new(RealClock),
        query_rx,
        responder_options,
        metrics,
    ))
}

async fn bind_and_demux_with_queries(
    options: EngineOptions,
) -> Result<
    (
        Arc<transport::Transport>,
        demux::Demux,
        tokio::sync::mpsc::Receiver<(mdns_types::protocol::types::Message, std::net::SocketAddr)>,
        Arc<Metrics>,
    ),
    Error,
> {
    let interfaces = match options.interfaces {
        Some(interfaces) => interfaces,
        None => transport::default_interfaces().map_err(|e| Error::network("enumerate interfaces", e))?,
    };
    let subnets = transport::interface_subnets().map_err(|e| Error::network("enumerate interfaces", e))?;

    let transport = Arc::new(transport::Transport::bind(&interfaces).await?);
    let metrics = Arc::new(Metrics::new());
    let security = security::SecurityFilter::new(options.security, subnets, metrics.clone());
    tokio::spawn(security::janitor_task(security.clone(), transport.cancellation()));

    let (demux, query_rx) = demux::Demux::spawn(transport.clone(), security);
    Ok((transport, demux, query_rx, metrics))
}
