//! Time-driven repeating/one-shot tasks that own all outbound UDP traffic.
//!
//! Every piece of UDP chatter this crate emits -- M-SEARCH probes, delayed
//! M-SEARCH replies, periodic alive NOTIFYs, the byebye burst on shutdown,
//! SUBSCRIBE renewals -- is modeled as a [`Schedule`] sitting in a
//! [`Scheduler`]. The scheduler itself only knows about due times; the
//! behavior for each kind of schedule lives in whatever `process` closure
//! was installed when it was added.

use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::net::UdpSocket;

/// Milliseconds since the unix epoch. The scheduler never reads the clock
/// itself except to compute `now()`; all due times are absolute.
pub type Millis = u64;

pub fn now_ms() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as Millis
}

/// Tags a [`Schedule`] with the behavior it drives. Used by
/// [`Scheduler::is_search_active`] and for diagnostics; the scheduler
/// itself treats every kind identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Control point: repeating M-SEARCH broadcast.
    MSearch,
    /// Device: delayed, randomized reply to an inbound M-SEARCH.
    MSearchReply,
    /// Control point: bookkeeping entry for a reply already being awaited.
    MSearchReplyCp,
    /// Control point: NOTIFY alive/byebye ingestion follow-up.
    NotifyReplyCp,
    /// Device: periodic `ssdp:alive` NOTIFY.
    PostAlive,
    /// Device: `ssdp:byebye` NOTIFY burst on shutdown.
    PostBye,
    /// Control point: SUBSCRIBE/renew-SUBSCRIBE.
    PostSubscribe,
    /// Either side: a generic deferred callback (e.g. NOTIFY-to-subscriber retry).
    Callback,
}

type ProcessFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Behavior invoked when a schedule comes due. Boxed so the scheduler can
/// hold a homogeneous queue of otherwise-unrelated jobs.
pub trait ScheduleBehavior: Send {
    fn process<'a>(&'a mut self, udp: &'a UdpSocket) -> ProcessFuture<'a>;
}

impl<F> ScheduleBehavior for F
where
    F: for<'a> FnMut(&'a UdpSocket) -> ProcessFuture<'a> + Send,
{
    fn process<'a>(&'a mut self, udp: &'a UdpSocket) -> ProcessFuture<'a> {
        self(udp)
    }
}

/// A unit of deferred/repeated UDP work.
///
/// `dueAt == 0` on construction means "as soon as possible" -- the
/// scheduler treats any `now >= due_at` as due, so a schedule added with
/// `due_at: 0` runs on the very next sweep.
pub struct Schedule {
    pub kind: ScheduleKind,
    pub due_at: Millis,
    /// `0` means one-shot.
    pub repeat_every_ms: Millis,
    /// `0` means forever (or until explicitly deactivated).
    pub end_at: Millis,
    pub active: bool,
    pub peer: Option<SocketAddr>,
    behavior: Box<dyn ScheduleBehavior>,
}

impl Schedule {
    pub fn new(
        kind: ScheduleKind,
        due_at: Millis,
        repeat_every_ms: Millis,
        end_at: Millis,
        peer: Option<SocketAddr>,
        behavior: Box<dyn ScheduleBehavior>,
    ) -> Self {
        Self {
            kind,
            due_at,
            repeat_every_ms,
            end_at,
            active: true,
            peer,
            behavior,
        }
    }

    pub fn one_shot(
        kind: ScheduleKind,
        due_at: Millis,
        peer: Option<SocketAddr>,
        behavior: Box<dyn ScheduleBehavior>,
    ) -> Self {
        Self::new(kind, due_at, 0, 0, peer, behavior)
    }

    pub fn repeating(
        kind: ScheduleKind,
        due_at: Millis,
        repeat_every_ms: Millis,
        end_at: Millis,
        behavior: Box<dyn ScheduleBehavior>,
    ) -> Self {
        Self::new(kind, due_at, repeat_every_ms, end_at, None, behavior)
    }

    fn is_due(&self, now: Millis) -> bool {
        self.active && now >= self.due_at
    }
}

/// Owns every in-flight [`Schedule`] for one runtime (device or control
/// point). Schedules are submitted by value -- the scheduler holds
/// exclusive ownership from that point on; nothing outside this module
/// keeps a reference to a queued schedule.
#[derive(Default)]
pub struct Scheduler {
    schedules: Vec<Schedule>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the schedule active and enqueues it.
    pub fn add(&mut self, mut schedule: Schedule) {
        schedule.active = true;
        self.schedules.push(schedule);
    }

    pub fn size(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_active(&self) -> bool {
        self.schedules.iter().any(|s| s.active)
    }

    pub fn set_active(&mut self, flag: bool) {
        for schedule in &mut self.schedules {
            schedule.active = flag;
        }
    }

    /// Used by the control-point main loop to gate parsing of discovery
    /// replies: while no `MSearch` schedule is active there's no live
    /// search to attribute a reply to.
    pub fn is_search_active(&self) -> bool {
        self.schedules
            .iter()
            .any(|s| s.active && s.kind == ScheduleKind::MSearch)
    }

    /// Iterate due schedules, invoke their behavior, reschedule or retire
    /// them, and sweep out (at most one) now-inactive schedule. A schedule
    /// whose `process` fails is logged and left queued for its next
    /// natural cadence -- no extra retry is scheduled.
    pub async fn execute(&mut self, udp: &UdpSocket) {
        let now = now_ms();

        for schedule in &mut self.schedules {
            if schedule.end_at != 0 && now > schedule.end_at {
                schedule.active = false;
                continue;
            }
            if !schedule.is_due(now) {
                continue;
            }

            match schedule.behavior.process(udp).await {
                Ok(()) => {
                    if schedule.repeat_every_ms > 0 {
                        schedule.due_at = now + schedule.repeat_every_ms;
                    } else {
                        schedule.active = false;
                    }
                }
                Err(e) => {
                    tracing::warn!(kind = ?schedule.kind, "scheduled task failed: {e}");
                }
            }
        }

        if let Some(pos) = self.schedules.iter().position(|s| !s.active) {
            self.schedules.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn counting_behavior(counter: Arc<AtomicUsize>) -> Box<dyn ScheduleBehavior> {
        Box::new(move |_udp: &UdpSocket| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as ProcessFuture<'_>
        })
    }

    #[tokio::test]
    async fn one_shot_deactivates_after_running() {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.add(Schedule::one_shot(
            ScheduleKind::MSearchReply,
            0,
            None,
            counting_behavior(counter.clone()),
        ));
        assert_eq!(scheduler.size(), 1);
        scheduler.execute(&udp).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.size(), 0);
    }

    #[tokio::test]
    async fn repeating_schedule_reschedules_with_cadence() {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.add(Schedule::repeating(
            ScheduleKind::PostAlive,
            0,
            60_000,
            0,
            counting_behavior(counter.clone()),
        ));
        scheduler.execute(&udp).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.size(), 1, "repeating schedule stays queued");
        // Not due yet: the next due_at is ~60s out.
        scheduler.execute(&udp).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn end_at_deactivates_repeating_schedule() {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.add(Schedule::repeating(
            ScheduleKind::MSearch,
            0,
            10,
            now_ms().saturating_sub(1),
            counting_behavior(counter.clone()),
        ));
        scheduler.execute(&udp).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0, "already past end_at");
        assert_eq!(scheduler.size(), 0);
    }

    #[tokio::test]
    async fn is_search_active_reflects_msearch_kind_only() {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut scheduler = Scheduler::new();
        assert!(!scheduler.is_search_active());
        scheduler.add(Schedule::repeating(
            ScheduleKind::MSearch,
            now_ms() + 10_000,
            10_000,
            0,
            counting_behavior(Arc::new(AtomicUsize::new(0))),
        ));
        assert!(scheduler.is_search_active());
        scheduler.execute(&udp).await;
        assert!(
            scheduler.is_search_active(),
            "not due yet, stays active and queued"
        );
    }
}
