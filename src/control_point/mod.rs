//! Control-point runtime: discovery driver, device registry and SOAP/event
//! client stitched onto a single `tokio` task.

use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::State,
    routing::{on, MethodFilter},
    Router,
};
use reqwest::Client;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    device_description::DeviceDescription,
    eventing::{parse_property_set, PropertyChange},
    scheduler::{now_ms, Schedule, ScheduleKind, Scheduler},
    service_client::{ActionCallError, ActionCallResult, ScpdClient, ScpdService},
    ssdp::{
        bind_ssdp_socket, resolve_local_addr, AnnounceHandler, BroadcastMessage, NotificationType,
        SearchMessage, UnicastAnnounce, SSDP_ADDR,
    },
    templates::{service_description::Scpd, UpnpAgent},
    FromXml,
};

const RENEW_FRACTION: f64 = 0.8;

/// One service hosted by a discovered device, with its URLs already
/// resolved against the device's `LOCATION`.
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    pub service_type: String,
    pub control_url: String,
    pub scpd_url: String,
    pub event_sub_url: String,
}

/// A remote device, as learned from its description XML the first time
/// this control point saw an announcement or search reply for it.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub udn: String,
    pub location: String,
    pub server: String,
    pub friendly_name: String,
    pub services: HashMap<String, DiscoveredService>,
    /// `false` once a `ssdp:byebye` has been seen for this UDN. The entry
    /// stays in the registry (queryable by [`DeviceRegistry::get`]) but
    /// [`ControlPointRuntime::connect_service`] refuses to dispatch to it.
    pub active: bool,
    pub last_seen: crate::scheduler::Millis,
}

/// Dedups discovered devices by UDN. Shared between the SSDP loop (which
/// inserts/updates entries) and application code (which reads them to pick
/// a device to talk to).
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DiscoveredDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, udn: &str) -> bool {
        self.devices.lock().unwrap().contains_key(udn)
    }

    pub fn insert(&self, device: DiscoveredDevice) {
        self.devices.lock().unwrap().insert(device.udn.clone(), device);
    }

    /// Marks a known device active again (and bumps its `last_seen`)
    /// without refetching its description. Returns `false` if `udn` isn't
    /// in the registry yet, so the caller knows to fetch it fresh.
    pub fn mark_active(&self, udn: &str) -> bool {
        let mut devices = self.devices.lock().unwrap();
        match devices.get_mut(udn) {
            Some(device) => {
                device.active = true;
                device.last_seen = now_ms();
                true
            }
            None => false,
        }
    }

    /// Per spec: a `ssdp:byebye` marks a device inactive but keeps it
    /// queryable, it does not remove the entry. Returns `false` if `udn`
    /// isn't known.
    pub fn mark_inactive(&self, udn: &str) -> bool {
        let mut devices = self.devices.lock().unwrap();
        match devices.get_mut(udn) {
            Some(device) => {
                device.active = false;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, udn: &str) -> Option<DiscoveredDevice> {
        self.devices.lock().unwrap().get(udn).cloned()
    }

    pub fn all(&self) -> Vec<DiscoveredDevice> {
        self.devices.lock().unwrap().values().cloned().collect()
    }
}

async fn fetch_device(
    client: &Client,
    location: &str,
    server: String,
) -> anyhow::Result<DiscoveredDevice> {
    let res = client.get(location).send().await?;
    let body = crate::xml_fetch::read_body_bounded(res).await?;
    let description = DeviceDescription::read_xml(&mut quick_xml::Reader::from_reader(body.as_slice()))?;
    let base = if description.url_base.is_empty() {
        reqwest::Url::parse(location)?
    } else {
        reqwest::Url::parse(&description.url_base)?
    };
    let udn = description.device.udn.to_string();
    let friendly_name = description.device.friendly_name.to_string();

    let mut services = HashMap::new();
    for service in description.device.all_services() {
        let mut control_url = base.clone();
        control_url.set_path(&service.control_url);
        let mut scpd_url = base.clone();
        scpd_url.set_path(&service.scpd_url);
        let mut event_sub_url = base.clone();
        event_sub_url.set_path(&service.event_sub_url);
        services.insert(
            service.service_type.to_string(),
            DiscoveredService {
                service_type: service.service_type.to_string(),
                control_url: control_url.to_string(),
                scpd_url: scpd_url.to_string(),
                event_sub_url: event_sub_url.to_string(),
            },
        );
    }

    Ok(DiscoveredDevice {
        udn,
        location: location.to_string(),
        server,
        friendly_name,
        services,
        active: true,
        last_seen: now_ms(),
    })
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ControlPointConfig {
    #[serde(default)]
    pub user_agent: UpnpAgent<'static>,
    #[serde(default = "uuid::Uuid::new_v4")]
    pub cp_uuid: Uuid,
    #[serde(default)]
    pub ttl: Option<u32>,
    /// Only devices on this subnet are kept in the registry; `None` disables
    /// the check.
    #[serde(default = "default_discovery_netmask")]
    pub subnet_mask: Option<Ipv4Addr>,
}

fn default_discovery_netmask() -> Option<Ipv4Addr> {
    Some(Ipv4Addr::new(255, 255, 255, 0))
}

impl Default for ControlPointConfig {
    fn default() -> Self {
        Self {
            user_agent: UpnpAgent::default(),
            cp_uuid: Uuid::new_v4(),
            ttl: None,
            subnet_mask: default_discovery_netmask(),
        }
    }
}

fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, mask: Ipv4Addr) -> bool {
    (u32::from(a) & u32::from(mask)) == (u32::from(b) & u32::from(mask))
}

/// One subscription this control point holds against a remote service.
/// Kept around by [`arm_renewal`]'s retry path so a rejected renewal can
/// resubscribe from scratch without the caller's involvement.
#[derive(Debug, Clone)]
struct ActiveSubscription {
    event_sub_url: String,
    notify_callback: String,
    timeout: usize,
    requested_timeout: usize,
}

async fn subscribe_request(
    client: &Client,
    event_sub_url: &str,
    notify_callback: &str,
    timeout_secs: usize,
) -> anyhow::Result<(Uuid, usize)> {
    let method = reqwest::Method::from_bytes(b"SUBSCRIBE")?;
    let response = client
        .request(method, event_sub_url)
        .header("CALLBACK", format!("<{notify_callback}>"))
        .header("NT", "upnp:event")
        .header("TIMEOUT", format!("Second-{timeout_secs}"))
        .send()
        .await?;
    anyhow::ensure!(response.status().is_success(), "subscribe failed: {}", response.status());
    let sid = response
        .headers()
        .get("SID")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("uuid:"))
        .ok_or_else(|| anyhow::anyhow!("subscribe response missing SID"))?
        .parse()?;
    let timeout = response
        .headers()
        .get("TIMEOUT")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Second-"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(timeout_secs);
    Ok((sid, timeout))
}

async fn renew_request(
    client: &Client,
    event_sub_url: &str,
    sid: Uuid,
    timeout_secs: usize,
) -> anyhow::Result<usize> {
    let method = reqwest::Method::from_bytes(b"SUBSCRIBE")?;
    let response = client
        .request(method, event_sub_url)
        .header("SID", format!("uuid:{sid}"))
        .header("TIMEOUT", format!("Second-{timeout_secs}"))
        .send()
        .await?;
    anyhow::ensure!(response.status().is_success(), "renew failed: {}", response.status());
    let timeout = response
        .headers()
        .get("TIMEOUT")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Second-"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(timeout_secs);
    Ok(timeout)
}

/// Renews `sid`'s lease when it comes due and re-arms its own successor so
/// the subscription keeps renewing for as long as it lives, instead of
/// lapsing after a single firing. A rejected renewal unsubscribes and
/// issues a fresh `SUBSCRIBE` against the same event URL, rotating the SID.
async fn renewal_cycle(
    sid: Uuid,
    client: Client,
    subscriptions: Arc<Mutex<HashMap<Uuid, ActiveSubscription>>>,
    pending_schedules: Arc<Mutex<Vec<Schedule>>>,
) -> anyhow::Result<()> {
    let Some(active) = subscriptions.lock().unwrap().get(&sid).cloned() else {
        return Ok(());
    };
    match renew_request(&client, &active.event_sub_url, sid, active.requested_timeout).await {
        Ok(granted_timeout) => {
            if let Some(entry) = subscriptions.lock().unwrap().get_mut(&sid) {
                entry.timeout = granted_timeout;
            }
            let due_in_ms = (granted_timeout as f64 * RENEW_FRACTION * 1000.0) as u64;
            pending_schedules.lock().unwrap().push(arm_renewal(
                sid,
                due_in_ms,
                client,
                subscriptions,
                pending_schedules.clone(),
            ));
        }
        Err(e) => {
            tracing::warn!(%sid, "subscription renewal rejected, resubscribing fresh: {e}");
            subscriptions.lock().unwrap().remove(&sid);
            match subscribe_request(
                &client,
                &active.event_sub_url,
                &active.notify_callback,
                active.requested_timeout,
            )
            .await
            {
                Ok((new_sid, granted_timeout)) => {
                    subscriptions.lock().unwrap().insert(
                        new_sid,
                        ActiveSubscription {
                            event_sub_url: active.event_sub_url.clone(),
                            notify_callback: active.notify_callback.clone(),
                            timeout: granted_timeout,
                            requested_timeout: active.requested_timeout,
                        },
                    );
                    let due_in_ms = (granted_timeout as f64 * RENEW_FRACTION * 1000.0) as u64;
                    pending_schedules.lock().unwrap().push(arm_renewal(
                        new_sid,
                        due_in_ms,
                        client,
                        subscriptions,
                        pending_schedules,
                    ));
                }
                Err(e2) => {
                    tracing::warn!("resubscribe after failed renewal also failed: {e2}");
                }
            }
        }
    }
    Ok(())
}

/// Builds the one-shot [`Schedule`] that fires [`renewal_cycle`] for `sid`.
/// The schedule pushes its own successor into `pending_schedules` rather
/// than being a repeating [`Schedule`], since the renewal cadence depends
/// on whatever TIMEOUT the remote service granted this round.
fn arm_renewal(
    sid: Uuid,
    due_in_ms: u64,
    client: Client,
    subscriptions: Arc<Mutex<HashMap<Uuid, ActiveSubscription>>>,
    pending_schedules: Arc<Mutex<Vec<Schedule>>>,
) -> Schedule {
    Schedule::one_shot(
        ScheduleKind::PostSubscribe,
        now_ms() + due_in_ms,
        None,
        Box::new(move |_udp: &UdpSocket| {
            Box::pin(renewal_cycle(
                sid,
                client.clone(),
                subscriptions.clone(),
                pending_schedules.clone(),
            ))
        }),
    )
}

pub struct ControlPointRuntime {
    config: ControlPointConfig,
    socket: Arc<UdpSocket>,
    fetch_client: Client,
    scheduler: Scheduler,
    registry: Arc<DeviceRegistry>,
    local_ip: Option<Ipv4Addr>,
    subscriptions: Arc<Mutex<HashMap<Uuid, ActiveSubscription>>>,
    /// Renewal schedules land here instead of directly in `scheduler`: a
    /// schedule's own behavior closure only has `&UdpSocket`, not `&mut
    /// self`, so [`renewal_cycle`] can't call `scheduler.add` itself. `run`
    /// drains this into `scheduler` every sweep.
    pending_schedules: Arc<Mutex<Vec<Schedule>>>,
    property_changes: Arc<Mutex<Vec<(Uuid, Vec<PropertyChange>)>>>,
}

impl ControlPointRuntime {
    pub async fn bind(config: ControlPointConfig) -> anyhow::Result<Self> {
        let socket = Arc::new(bind_ssdp_socket(config.ttl)?);
        let local_addr = resolve_local_addr().await?;
        let local_ip = match local_addr.ip() {
            std::net::IpAddr::V4(ip) => Some(ip),
            std::net::IpAddr::V6(_) => None,
        };
        Ok(Self {
            config,
            socket,
            fetch_client: Client::new(),
            scheduler: Scheduler::new(),
            registry: Arc::new(DeviceRegistry::new()),
            local_ip,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            pending_schedules: Arc::new(Mutex::new(Vec::new())),
            property_changes: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// Drains NOTIFY property changes received for subscriptions made
    /// through this runtime, in delivery order.
    pub fn drain_property_changes(&self) -> Vec<(Uuid, Vec<PropertyChange>)> {
        std::mem::take(&mut self.property_changes.lock().unwrap())
    }

    /// Adds a repeating M-SEARCH schedule for `search_target`, fired every
    /// `interval`. Replies are picked up by [`Self::run`] and fed into the
    /// registry as they arrive.
    pub fn begin_search(&mut self, search_target: NotificationType, interval: Duration) {
        let msg = SearchMessage {
            host: SSDP_ADDR,
            st: search_target,
            mx: Some(3),
            user_agent: None,
            tcp_port: None,
            cp_fn: None,
            cp_uuid: None,
        };
        let payload = msg.to_string();
        self.scheduler.add(Schedule::repeating(
            ScheduleKind::MSearch,
            now_ms(),
            interval.as_millis() as u64,
            0,
            Box::new(move |udp: &UdpSocket| {
                let payload = payload.clone();
                Box::pin(async move {
                    udp.send_to(payload.as_bytes(), SSDP_ADDR).await?;
                    Ok(())
                })
            }),
        ));
    }

    /// Runs a bounded discovery pass for `search_target`: sends the M-SEARCH
    /// immediately, then pumps the socket until either at least one device
    /// has registered and `min_wait` has elapsed, or `max_wait` has elapsed
    /// regardless of what was found. Returns the registry snapshot at the
    /// point discovery stopped. Intended for one-shot "find me a renderer"
    /// callers; long-lived discovery should use [`Self::begin_search`] plus
    /// [`Self::run`] instead.
    pub async fn begin(
        &mut self,
        search_target: NotificationType,
        min_wait: Duration,
        max_wait: Duration,
    ) -> anyhow::Result<Vec<DiscoveredDevice>> {
        let msg = SearchMessage {
            host: SSDP_ADDR,
            st: search_target,
            mx: Some(max_wait.as_secs().max(1) as usize),
            user_agent: None,
            tcp_port: None,
            cp_fn: None,
            cp_uuid: None,
        };
        self.socket
            .send_to(msg.to_string().as_bytes(), SSDP_ADDR)
            .await?;

        let deadline = tokio::time::Instant::now() + max_wait;
        let min_deadline = tokio::time::Instant::now() + min_wait;
        let mut buf = [0u8; 2048];
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            if now >= min_deadline && !self.registry.all().is_empty() {
                break;
            }
            let recv_deadline = if now < min_deadline { min_deadline } else { deadline };
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    if let Ok((read, sender)) = result {
                        self.handle_datagram(&buf[..read], sender);
                    }
                }
                _ = tokio::time::sleep_until(recv_deadline) => {}
            }
        }
        Ok(self.registry.all())
    }

    fn passes_subnet_filter(&self, sender: SocketAddr) -> bool {
        match (self.local_ip, self.config.subnet_mask, sender.ip()) {
            (Some(local), Some(mask), std::net::IpAddr::V4(peer)) => same_subnet(local, peer, mask),
            _ => true,
        }
    }

    /// Marks `udn` active (reviving a byebye'd entry without refetching) or,
    /// if it's genuinely new, spawns a background fetch of its description.
    fn spawn_register(&self, udn: String, location: String, server: String) {
        if self.registry.mark_active(&udn) {
            return;
        }
        let client = self.fetch_client.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            match fetch_device(&client, &location, server).await {
                Ok(device) => {
                    tracing::debug!(udn = %device.udn, "discovered device");
                    registry.insert(device);
                }
                Err(e) => tracing::debug!("failed to fetch device description from {location}: {e}"),
            }
        });
    }

    fn handle_datagram(&self, data: &[u8], sender: SocketAddr) {
        if !self.passes_subnet_filter(sender) {
            return;
        }
        let Ok(payload) = std::str::from_utf8(data) else {
            return;
        };
        if payload.starts_with("HTTP/1.1 200") {
            match UnicastAnnounce::parse_announce(payload) {
                Ok(announce) => {
                    let udn = announce.usn.udn().to_string();
                    self.spawn_register(udn, announce.location, announce.server);
                }
                Err(e) => tracing::trace!("failed to parse search reply: {e}"),
            }
            return;
        }
        match BroadcastMessage::parse_ssdp_payload(payload) {
            Ok(BroadcastMessage::NotifyAlive(alive)) => {
                let udn = alive.usn.udn().to_string();
                self.spawn_register(udn, alive.location.into_owned(), alive.server.to_string());
            }
            Ok(BroadcastMessage::NotifyByeBye(byebye)) => {
                let udn = byebye.usn.udn().to_string();
                if self.registry.mark_inactive(&udn) {
                    tracing::debug!(udn, "device left the network");
                }
            }
            Ok(BroadcastMessage::NotifyUpdate(_) | BroadcastMessage::Search(_)) => {}
            Err(e) => tracing::trace!("failed to parse ssdp datagram: {e}"),
        }
    }

    /// Resolves a [`ScpdClient`] for `T` on the device identified by `udn`,
    /// fetching and parsing its SCPD document on demand. Refuses a device
    /// that has sent `ssdp:byebye` since it was last seen, even though its
    /// entry is still in the registry.
    pub async fn connect_service<T: ScpdService>(&self, udn: &str) -> ActionCallResult<ScpdClient<T>> {
        let device = self.registry.get(udn).ok_or(ActionCallError::NotSupported)?;
        if !device.active {
            return Err(ActionCallError::NotSupported);
        }
        let urn = T::URN.to_string();
        let service = device
            .services
            .get(&urn)
            .ok_or(ActionCallError::NotSupported)?;
        let res = self.fetch_client.get(&service.scpd_url).send().await?;
        let scpd_xml = crate::xml_fetch::read_body_bounded(res)
            .await
            .map_err(ActionCallError::Other)?;
        let scpd = Scpd::read_xml(&mut quick_xml::Reader::from_reader(scpd_xml.as_slice()))
            .map_err(ActionCallError::Other)?;
        Ok(ScpdClient::new(scpd, service.control_url.clone()))
    }

    /// Subscribes to a service's eventing, scheduling a renewal at
    /// `RENEW_FRACTION` of the granted lease. `notify_callback` is the
    /// publicly reachable URL this control point's own event endpoint is
    /// served at (see [`Self::event_router`]).
    pub async fn subscribe(
        &mut self,
        udn: &str,
        service_type: &str,
        notify_callback: &str,
        timeout_secs: usize,
    ) -> anyhow::Result<Uuid> {
        let device = self
            .registry
            .get(udn)
            .ok_or_else(|| anyhow::anyhow!("unknown device {udn}"))?;
        let service = device
            .services
            .get(service_type)
            .ok_or_else(|| anyhow::anyhow!("device does not expose service {service_type}"))?;
        let (sid, timeout) =
            subscribe_request(&self.fetch_client, &service.event_sub_url, notify_callback, timeout_secs).await?;

        self.subscriptions.lock().unwrap().insert(
            sid,
            ActiveSubscription {
                event_sub_url: service.event_sub_url.clone(),
                notify_callback: notify_callback.to_string(),
                timeout,
                requested_timeout: timeout_secs,
            },
        );
        self.schedule_renewal(sid, timeout);
        Ok(sid)
    }

    /// Arms the first renewal for `sid`. Every renewal after that is
    /// re-armed by [`renewal_cycle`] itself, via `pending_schedules`, so a
    /// subscription keeps renewing for its whole life instead of lapsing
    /// after one cycle.
    fn schedule_renewal(&mut self, sid: Uuid, timeout: usize) {
        let due_in_ms = (timeout as f64 * RENEW_FRACTION * 1000.0) as u64;
        self.scheduler.add(arm_renewal(
            sid,
            due_in_ms,
            self.fetch_client.clone(),
            self.subscriptions.clone(),
            self.pending_schedules.clone(),
        ));
    }

    pub async fn unsubscribe(&mut self, sid: Uuid) -> anyhow::Result<()> {
        let Some(active) = self.subscriptions.lock().unwrap().remove(&sid) else {
            return Ok(());
        };
        let method = reqwest::Method::from_bytes(b"UNSUBSCRIBE")?;
        self.fetch_client
            .request(method, active.event_sub_url)
            .header("SID", format!("uuid:{sid}"))
            .send()
            .await?;
        Ok(())
    }

    /// Axum router this control point's `notify_callback` URL must be
    /// served at; parses incoming NOTIFY bodies and stores the resulting
    /// property changes for [`Self::drain_property_changes`].
    pub fn event_router(&self) -> Router {
        let state = NotifyState {
            property_changes: self.property_changes.clone(),
        };
        Router::new()
            .route(
                "/notify",
                on(MethodFilter::from_bytes(b"NOTIFY").expect("valid method"), handle_notify),
            )
            .with_state(state)
    }

    pub async fn run(&mut self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let mut sweep = tokio::time::interval(Duration::from_millis(200));
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    self.scheduler.execute(&self.socket).await;
                    for schedule in self.pending_schedules.lock().unwrap().drain(..) {
                        self.scheduler.add(schedule);
                    }
                }
                Ok((read, sender)) = self.socket.recv_from(&mut buf) => {
                    self.handle_datagram(&buf[..read], sender);
                }
                _ = cancellation_token.cancelled() => {
                    return Ok(());
                }
            }
        }
    }
}

#[derive(Clone)]
struct NotifyState {
    property_changes: Arc<Mutex<Vec<(Uuid, Vec<PropertyChange>)>>>,
}

async fn handle_notify(
    State(state): State<NotifyState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> axum::http::StatusCode {
    let Some(sid) = headers
        .get("SID")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("uuid:"))
        .and_then(|v| v.parse::<Uuid>().ok())
    else {
        return axum::http::StatusCode::BAD_REQUEST;
    };
    match parse_property_set(&body) {
        Ok(changes) => {
            state.property_changes.lock().unwrap().push((sid, changes));
            axum::http::StatusCode::OK
        }
        Err(e) => {
            tracing::warn!("failed to parse NOTIFY body: {e}");
            axum::http::StatusCode::BAD_REQUEST
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device(udn: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            udn: udn.to_string(),
            location: format!("http://192.168.1.20:80/{udn}/device.xml"),
            server: "test/1.0".to_string(),
            friendly_name: "Test Device".to_string(),
            services: HashMap::new(),
            active: true,
            last_seen: now_ms(),
        }
    }

    #[test]
    fn registry_dedups_by_udn() {
        let registry = DeviceRegistry::new();
        registry.insert(sample_device("uuid:1"));
        registry.insert(sample_device("uuid:1"));
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn byebye_marks_device_inactive_without_removing_it() {
        let registry = DeviceRegistry::new();
        registry.insert(sample_device("uuid:1"));
        assert!(registry.mark_inactive("uuid:1"));
        let device = registry.get("uuid:1").expect("entry stays in the registry");
        assert!(!device.active);
    }

    #[test]
    fn mark_active_revives_a_byebyed_device_without_refetching() {
        let registry = DeviceRegistry::new();
        registry.insert(sample_device("uuid:1"));
        registry.mark_inactive("uuid:1");
        assert!(registry.mark_active("uuid:1"));
        assert!(registry.get("uuid:1").unwrap().active);
    }

    #[test]
    fn mark_active_on_unknown_udn_reports_miss() {
        let registry = DeviceRegistry::new();
        assert!(!registry.mark_active("uuid:unknown"));
    }

    #[test]
    fn same_subnet_matches_bit_for_bit_under_mask() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let local = Ipv4Addr::new(192, 168, 1, 10);
        assert!(same_subnet(local, Ipv4Addr::new(192, 168, 1, 200), mask));
        assert!(!same_subnet(local, Ipv4Addr::new(10, 0, 0, 5), mask));
    }

    #[test]
    fn control_point_config_defaults_to_class_c_netmask() {
        let config = ControlPointConfig::default();
        assert_eq!(config.subnet_mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert!(config.ttl.is_none());
    }
}
