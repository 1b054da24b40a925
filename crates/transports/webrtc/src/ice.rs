//! ICE server configuration and API construction

use meetmesh_core::{MeshConfig, Result};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// STUN and TURN servers from `config`, STUN first
pub fn ice_servers(config: &MeshConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect()
}

pub fn rtc_configuration(config: &MeshConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(config),
        ..Default::default()
    }
}

/// Options for the shared webrtc API instance
#[derive(Debug, Clone, Default)]
pub struct ApiOptions {
    /// Gather 127.0.0.1 host candidates (same-host peers, tests)
    pub include_loopback: bool,
}

/// Build the API shared by every peer connection of one factory.
///
/// Registers the default codecs (Opus, VP8, VP9, H.264) and interceptors.
pub fn build_api(options: &ApiOptions) -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| config_error("register codecs", e))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| config_error("register interceptors", e))?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);
    if options.include_loopback {
        setting_engine.set_include_loopback_candidate(true);
    }

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

fn config_error(what: &str, e: webrtc::Error) -> meetmesh_core::Error {
    meetmesh_core::Error::ConfigError(format!("Failed to {}: {}", what, e))
}
