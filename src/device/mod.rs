//! Device-side runtime: owns the SSDP socket, the scheduler driving every
//! outbound UDP message, the HTTP router (description/SCPD/control/event),
//! and the subscriber store.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{
    content_directory::{ContentDirectoryHandler, ContentDirectoryService},
    device_description::{DeviceDescription, Udn},
    eventing::{deliver_notify, PropertyChange, SubscribersStore},
    router::{self, UpnpRouter},
    scheduler::{now_ms, Schedule, ScheduleKind, Scheduler},
    ssdp::{
        bind_ssdp_socket, resolve_local_addr, Announce, AnnounceHandler, BroadcastMessage,
        MulticastAnnounce, NotificationSubType, NotificationType, NotifyByeByeMessage,
        UnicastAnnounce, SSDP_ADDR, USN,
    },
    templates::UpnpAgent,
    urn::{DeviceType, ServiceType, UrnType, URN},
};

const CACHE_CONTROL: usize = 1800;
const NOTIFY_INTERVAL: Duration = Duration::from_secs(90);
const SWEEP_INTERVAL: Duration = Duration::from_millis(200);
const SUBSCRIBER_EVICTION_INTERVAL: Duration = Duration::from_secs(30);
/// Gap between successive unicast replies in one M-SEARCH reply burst, so a
/// control point's receive buffer doesn't drop back-to-back datagrams.
const ANNOUNCE_STAGGER: Duration = Duration::from_millis(80);

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeviceRuntimeConfig {
    pub friendly_name: String,
    #[serde(default = "uuid::Uuid::new_v4")]
    pub uuid: uuid::Uuid,
    pub http_port: u16,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub user_agent: UpnpAgent<'static>,
    /// Only replies to an M-SEARCH from a peer on this subnet; `None`
    /// disables the check. See [`DeviceRuntime::passes_subnet_filter`].
    #[serde(default = "default_discovery_netmask")]
    pub discovery_netmask: Option<Ipv4Addr>,
}

fn default_discovery_netmask() -> Option<Ipv4Addr> {
    Some(Ipv4Addr::new(255, 255, 255, 0))
}

impl Default for DeviceRuntimeConfig {
    fn default() -> Self {
        Self {
            friendly_name: "upnp-rs media server".to_string(),
            uuid: uuid::Uuid::new_v4(),
            http_port: 8200,
            ttl: None,
            user_agent: UpnpAgent::default(),
            discovery_netmask: default_discovery_netmask(),
        }
    }
}

fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, mask: Ipv4Addr) -> bool {
    (u32::from(a) & u32::from(mask)) == (u32::from(b) & u32::from(mask))
}

fn content_directory_urn() -> URN {
    URN {
        version: 1,
        urn_type: UrnType::Service(ServiceType::ContentDirectory),
    }
}

async fn send_multicast(udp: &UdpSocket, announce: &Announce) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    MulticastAnnounce::handle_announce(announce, &mut buf)?;
    udp.send_to(&buf, SSDP_ADDR).await?;
    Ok(())
}

async fn send_unicast(udp: &UdpSocket, peer: SocketAddr, announce: &Announce) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    UnicastAnnounce::handle_announce(announce, &mut buf)?;
    udp.send_to(&buf, peer).await?;
    Ok(())
}

/// A device's four standing identities (root device, plain UUID, the
/// device-type URN and the ContentDirectory service URN). The periodic
/// multicast `ssdp:alive` burst, an M-SEARCH reply and the shutdown
/// `ssdp:byebye` burst are all built from the same set.
#[derive(Debug, Clone)]
struct Identity {
    uuid: uuid::Uuid,
    location: String,
    server: String,
    boot_id: usize,
    config_id: usize,
}

impl Identity {
    fn udn(&self) -> Udn {
        Udn::new(self.uuid)
    }

    fn announce_for(&self, notification_type: NotificationType, usn: USN) -> Announce {
        Announce {
            cache_control: CACHE_CONTROL,
            location: self.location.clone(),
            server: self.server.clone(),
            notification_type,
            usn,
            boot_id: self.boot_id,
            config_id: self.config_id,
            search_port: None,
        }
    }

    fn all_announces(&self) -> Vec<Announce> {
        let udn = self.udn();
        vec![
            self.announce_for(NotificationType::RootDevice, USN::root_device(udn.clone())),
            self.announce_for(NotificationType::Uuid(self.uuid), USN::device_uuid(udn.clone())),
            self.announce_for(
                NotificationType::Urn(URN::media_server()),
                USN::urn(udn.clone(), URN::media_server()),
            ),
            self.announce_for(
                NotificationType::Urn(content_directory_urn()),
                USN::urn(udn, content_directory_urn()),
            ),
        ]
    }

    fn byebye_for(&self, nt: NotificationType, usn: USN) -> NotifyByeByeMessage {
        NotifyByeByeMessage {
            host: SSDP_ADDR,
            usn,
            nt,
            nts: NotificationSubType::ByeBye,
            boot_id: self.boot_id,
            config_id: self.config_id,
        }
    }

    fn all_byebyes(&self) -> Vec<NotifyByeByeMessage> {
        let udn = self.udn();
        vec![
            self.byebye_for(NotificationType::RootDevice, USN::root_device(udn.clone())),
            self.byebye_for(NotificationType::Uuid(self.uuid), USN::device_uuid(udn.clone())),
            self.byebye_for(
                NotificationType::Urn(URN::media_server()),
                USN::urn(udn.clone(), URN::media_server()),
            ),
            self.byebye_for(
                NotificationType::Urn(content_directory_urn()),
                USN::urn(udn, content_directory_urn()),
            ),
        ]
    }

    /// Picks which of the four identities (if any) match an inbound search
    /// target, per UPnP Device Architecture §1.2.2.
    fn matching_announces(&self, target: &NotificationType) -> Vec<Announce> {
        match target {
            NotificationType::All => self.all_announces(),
            NotificationType::RootDevice => {
                vec![self.announce_for(NotificationType::RootDevice, USN::root_device(self.udn()))]
            }
            NotificationType::Uuid(uuid) if *uuid == self.uuid => {
                vec![self.announce_for(NotificationType::Uuid(self.uuid), USN::device_uuid(self.udn()))]
            }
            NotificationType::Uuid(_) => vec![],
            NotificationType::Urn(urn) => match &urn.urn_type {
                UrnType::Device(DeviceType::MediaServer) => vec![self.announce_for(
                    NotificationType::Urn(URN::media_server()),
                    USN::urn(self.udn(), URN::media_server()),
                )],
                UrnType::Service(ServiceType::ContentDirectory) => vec![self.announce_for(
                    NotificationType::Urn(content_directory_urn()),
                    USN::urn(self.udn(), content_directory_urn()),
                )],
                _ => vec![],
            },
        }
    }
}

pub struct DeviceRuntime<T: ContentDirectoryHandler> {
    config: DeviceRuntimeConfig,
    socket: Arc<UdpSocket>,
    scheduler: Scheduler,
    identity: Identity,
    subscribers: Arc<SubscribersStore>,
    notify_client: reqwest::Client,
    content_directory: ContentDirectoryService<T>,
    description_xml: String,
    local_ip: Option<Ipv4Addr>,
}

impl<T: ContentDirectoryHandler + Clone + Send + Sync + 'static> DeviceRuntime<T> {
    pub async fn bind(config: DeviceRuntimeConfig, handler: T) -> anyhow::Result<Self> {
        let socket = Arc::new(bind_ssdp_socket(config.ttl)?);
        let local_addr = resolve_local_addr().await?;
        tracing::debug!("Resolved local ip address {local_addr}");
        let local_ip = match local_addr.ip() {
            std::net::IpAddr::V4(ip) => Some(ip),
            std::net::IpAddr::V6(_) => None,
        };
        let url_base = format!("http://{addr}:{port}", addr = local_addr.ip(), port = config.http_port);
        let location = format!("{url_base}/upnp{path}", path = router::DESC_PATH);

        let description =
            DeviceDescription::new(config.friendly_name.clone(), config.uuid, url_base);
        let description_xml = description.into_xml()?;

        let identity = Identity {
            uuid: config.uuid,
            location,
            server: config.user_agent.to_string(),
            boot_id: 8399389,
            config_id: 9999,
        };

        let mut scheduler = Scheduler::new();
        schedule_alive_bursts(&mut scheduler, identity.clone());
        schedule_subscriber_eviction(&mut scheduler);

        Ok(Self {
            config,
            socket,
            scheduler,
            identity,
            subscribers: Arc::new(SubscribersStore::new()),
            notify_client: reqwest::Client::new(),
            content_directory: ContentDirectoryService::new(handler),
            description_xml,
            local_ip,
        })
    }

    /// Subnet filter per spec: a peer outside `discovery_netmask` of this
    /// device's resolved local address gets no M-SEARCH reply at all.
    fn passes_subnet_filter(&self, sender: SocketAddr) -> bool {
        match (self.local_ip, self.config.discovery_netmask, sender.ip()) {
            (Some(local), Some(mask), std::net::IpAddr::V4(peer)) => {
                same_subnet(local, peer, mask)
            }
            _ => true,
        }
    }

    pub fn subscribers(&self) -> Arc<SubscribersStore> {
        self.subscribers.clone()
    }

    /// Fans a batch of changed state variables out to every live subscriber
    /// of `service_name` as a `NOTIFY` carrying an `e:propertyset` body.
    /// Each subscriber gets its own monotonically increasing `SEQ`; a
    /// subscriber that fails delivery doesn't block the others.
    pub async fn notify_property_change(&self, service_name: &str, changes: Vec<PropertyChange>) {
        if changes.is_empty() {
            return;
        }
        for subscriber in self.subscribers.subscribers_for(service_name) {
            let Some(seq) = self.subscribers.bump_seq(subscriber.sid) else {
                continue;
            };
            deliver_notify(&self.notify_client, &subscriber, seq, &changes).await;
        }
    }

    pub fn router(&self) -> axum::Router {
        let router = UpnpRouter::<()>::new("/upnp", self.description_xml.clone()).register_service(
            self.content_directory.clone(),
            self.subscribers.clone(),
            self.config.user_agent.clone(),
        );
        router.into()
    }

    fn handle_datagram(&mut self, data: &[u8], sender: SocketAddr) -> anyhow::Result<()> {
        let payload = std::str::from_utf8(data)?;
        let message = BroadcastMessage::parse_ssdp_payload(payload)?;
        match message {
            BroadcastMessage::Search(search) => {
                tracing::debug!(st = %search.st, mx = ?search.mx, addr = %sender, "received M-SEARCH");
                if !self.passes_subnet_filter(sender) {
                    tracing::trace!(addr = %sender, "M-SEARCH from outside discovery subnet, ignoring");
                    return Ok(());
                }
                let announces = self.identity.matching_announces(&search.st);
                if announces.is_empty() {
                    return Ok(());
                }
                let delay_ms = search
                    .mx
                    .map(|mx| {
                        let upper = (mx.saturating_sub(1) as u64).clamp(1, 5) * 1000;
                        rand::rng().random_range(0..upper.max(1))
                    })
                    .unwrap_or(0);
                let socket = self.socket.clone();
                self.scheduler.add(Schedule::one_shot(
                    ScheduleKind::MSearchReply,
                    now_ms() + delay_ms,
                    Some(sender),
                    Box::new(move |_udp: &UdpSocket| {
                        let announces = announces.clone();
                        let socket = socket.clone();
                        Box::pin(async move {
                            let mut first = true;
                            for announce in &announces {
                                if !first {
                                    tokio::time::sleep(ANNOUNCE_STAGGER).await;
                                }
                                first = false;
                                send_unicast(&socket, sender, announce).await?;
                            }
                            Ok(())
                        })
                    }),
                ));
            }
            BroadcastMessage::NotifyAlive(alive) => {
                tracing::trace!(nt = %alive.nt, "received alive notification");
            }
            BroadcastMessage::NotifyByeBye(byebye) => {
                tracing::trace!(nt = %byebye.nt, "received byebye notification");
            }
            BroadcastMessage::NotifyUpdate(update) => {
                tracing::trace!(nt = %update.nt, "received update notification");
            }
        }
        Ok(())
    }

    async fn send_byebye_burst(&self) {
        for byebye in self.identity.all_byebyes() {
            if let Err(e) = self
                .socket
                .send_to(byebye.to_string().as_bytes(), SSDP_ADDR)
                .await
            {
                tracing::warn!("failed to send byebye message: {e}");
            }
        }
    }

    /// Runs the device's SSDP loop and HTTP server side by side until
    /// `cancellation_token` fires, at which point a byebye burst is sent
    /// before returning.
    pub async fn run(&mut self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.config.http_port)).await?;
        let http_cancel = cancellation_token.clone();
        let http_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { http_cancel.cancelled().await })
                .await
            {
                tracing::warn!("http server exited with error: {e}");
            }
        });

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    self.scheduler.execute(&self.socket).await;
                    for expired in self.subscribers.evict_expired() {
                        tracing::debug!(sid = %expired.sid, "subscription lease expired");
                    }
                }
                Ok((read, sender)) = self.socket.recv_from(&mut buf) => {
                    if let Err(e) = self.handle_datagram(&buf[..read], sender) {
                        tracing::warn!("failed to handle ssdp datagram: {e}");
                    }
                }
                _ = cancellation_token.cancelled() => {
                    self.send_byebye_burst().await;
                    let _ = http_task.await;
                    return Ok(());
                }
            }
        }
    }
}

fn schedule_alive_bursts(scheduler: &mut Scheduler, identity: Identity) {
    // Two staggered repeating announces halve the worst-case gap between a
    // control point joining the network and hearing about this device.
    for offset in [0u64, NOTIFY_INTERVAL.as_millis() as u64 / 2] {
        let identity = identity.clone();
        scheduler.add(Schedule::repeating(
            ScheduleKind::PostAlive,
            now_ms() + offset,
            NOTIFY_INTERVAL.as_millis() as u64,
            0,
            Box::new(move |udp: &UdpSocket| {
                let identity = identity.clone();
                Box::pin(async move {
                    for announce in identity.all_announces() {
                        send_multicast(udp, &announce).await?;
                    }
                    Ok(())
                })
            }),
        ));
    }
}

fn schedule_subscriber_eviction(scheduler: &mut Scheduler) {
    scheduler.add(Schedule::repeating(
        ScheduleKind::Callback,
        now_ms() + SUBSCRIBER_EVICTION_INTERVAL.as_millis() as u64,
        SUBSCRIBER_EVICTION_INTERVAL.as_millis() as u64,
        0,
        Box::new(|_udp: &UdpSocket| Box::pin(async move { Ok(()) })),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_identity() -> Identity {
        Identity {
            uuid: uuid::Uuid::new_v4(),
            location: "http://192.168.1.10:8200/upnp/device.xml".to_string(),
            server: "test/1.0".to_string(),
            boot_id: 1,
            config_id: 1,
        }
    }

    #[test]
    fn matching_announces_all_returns_every_identity() {
        let identity = sample_identity();
        assert_eq!(identity.matching_announces(&NotificationType::All).len(), 4);
    }

    #[test]
    fn matching_announces_rejects_foreign_uuid() {
        let identity = sample_identity();
        let foreign = NotificationType::Uuid(uuid::Uuid::new_v4());
        assert!(identity.matching_announces(&foreign).is_empty());
    }

    #[test]
    fn matching_announces_accepts_own_uuid() {
        let identity = sample_identity();
        let target = NotificationType::Uuid(identity.uuid);
        assert_eq!(identity.matching_announces(&target).len(), 1);
    }

    #[test]
    fn matching_announces_resolves_content_directory_urn() {
        let identity = sample_identity();
        let target = NotificationType::Urn(content_directory_urn());
        assert_eq!(identity.matching_announces(&target).len(), 1);
    }

    #[test]
    fn same_subnet_matches_under_mask() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let local = Ipv4Addr::new(192, 168, 1, 10);
        let peer = Ipv4Addr::new(192, 168, 1, 200);
        assert!(same_subnet(local, peer, mask));
    }

    #[test]
    fn same_subnet_rejects_peer_on_different_network() {
        // Mirrors testable scenario 6: M-SEARCH from 10.0.0.5 against a
        // device on 192.168.1.10/24 must not be answered.
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let local = Ipv4Addr::new(192, 168, 1, 10);
        let peer = Ipv4Addr::new(10, 0, 0, 5);
        assert!(!same_subnet(local, peer, mask));
    }

    #[test]
    fn device_runtime_config_default_has_class_c_netmask() {
        let config = DeviceRuntimeConfig::default();
        assert_eq!(
            config.discovery_netmask,
            Some(Ipv4Addr::new(255, 255, 255, 0))
        );
        assert!(config.ttl.is_none());
    }
}
