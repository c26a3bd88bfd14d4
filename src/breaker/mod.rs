//! # breaker — Crash Circuit Breaker
//!
//! Last line of defence before any entry: halts new positions and forces
//! existing ones closed during a market-wide crash, then re-arms once the
//! market has demonstrably stabilised.
//!
//! ## States
//! ```text
//!   SAFE ──near threshold──▶ WARNING ──calm──▶ SAFE
//!    │                          │
//!    └──────crash rule──────────┴──▶ TRIGGERED ──first calm──▶ RECOVERING
//!                                        ▲  ◀──renewed drop / no data──┤
//!                                                                      │
//!   resume() from any non-SAFE ──▶ SAFE         all recovery conditions
//!                                                                      ▼
//!                                                                    SAFE
//! ```
//!
//! Calm has to be observed: a snapshot missing the benchmark window
//! changes never clears WARNING and never counts toward stabilization.
//!
//! [`BreakerCore`] is a deterministic state machine: it never reads the
//! wall clock during evaluation, every window is measured against snapshot
//! timestamps.  That lets the backtest replay historical snapshots through
//! the exact same rules.  [`CircuitBreaker`] is the shared async handle used
//! by the live engine and the HTTP surface.

pub mod recovery;
pub mod rules;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::MarketSnapshot;
use recovery::Stability;

pub use recovery::{RecoveryAssessment, RecoveryProgress, RecoveryThresholds};
pub use rules::{check_crash_conditions, CrashCheck, CrashThresholds, TriggerReason};

/// Snapshots kept for status / manual triggers.
const HISTORY_CAPACITY: usize = 1000;

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub crash:    CrashThresholds,
    pub recovery: RecoveryThresholds,
}

impl BreakerConfig {
    pub fn from_env() -> Self {
        Self {
            crash:    CrashThresholds::from_env(),
            recovery: RecoveryThresholds::from_env(),
        }
    }
}

// ─── State / Events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    #[default]
    Safe,
    Warning,
    Triggered,
    Recovering,
}

impl BreakerState {
    /// TRIGGERED and RECOVERING force open positions closed.
    pub fn forces_exit(self) -> bool {
        matches!(self, BreakerState::Triggered | BreakerState::Recovering)
    }

    /// Only SAFE permits new entries.
    pub fn is_safe(self) -> bool {
        self == BreakerState::Safe
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Safe       => "SAFE",
            BreakerState::Warning    => "WARNING",
            BreakerState::Triggered  => "TRIGGERED",
            BreakerState::Recovering => "RECOVERING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerEventKind {
    Warning,
    WarningCleared,
    Triggered,
    RecoveryStarted,
    StabilizationReset,
    AutoRecovered,
    ManualResume,
}

/// One append-only audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerEvent {
    pub event_id:    Uuid,
    pub kind:        BreakerEventKind,
    pub from_state:  BreakerState,
    pub to_state:    BreakerState,
    pub timestamp:   DateTime<Utc>,
    pub reason:      Option<TriggerReason>,
    pub message:     String,
    pub snapshot:    Option<MarketSnapshot>,
    pub actions_taken: Vec<String>,
    pub recovery_duration_minutes: Option<f64>,
    pub capital_protected_usd:     Option<f64>,
}

/// Result of one [`BreakerCore::evaluate`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub state:  BreakerState,
    pub events: Vec<BreakerEvent>,
}

impl Evaluation {
    pub fn transitioned(&self) -> bool {
        self.events.iter().any(|e| e.from_state != e.to_state)
    }
}

// ─── Status / Statistics (for Dashboard / API) ───────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state:                    BreakerState,
    pub is_safe:                  bool,
    pub trigger_reason:           Option<TriggerReason>,
    pub trigger_message:          Option<String>,
    pub trigger_time:             Option<DateTime<Utc>>,
    pub stabilization_started_at: Option<DateTime<Utc>>,
    pub minutes_since_trigger:    Option<f64>,
    pub last_check_time:          Option<DateTime<Utc>>,
    pub consecutive_data_misses:  u32,
    pub last_data_error:          Option<String>,
    pub latest_snapshot:          Option<MarketSnapshot>,
    pub last_assessment:          Option<RecoveryAssessment>,
    pub config:                   BreakerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BreakerStatistics {
    pub total_triggers:              usize,
    pub auto_recoveries:             usize,
    pub manual_resumes:              usize,
    pub avg_recovery_minutes:        Option<f64>,
    pub total_capital_protected_usd: f64,
    pub last_trigger_time:           Option<DateTime<Utc>>,
    pub last_trigger_reason:         Option<String>,
}

// ─── Core ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TriggerRecord {
    reason:    TriggerReason,
    timestamp: DateTime<Utc>,
}

/// Synchronous breaker state machine.
#[derive(Debug, Clone)]
pub struct BreakerCore {
    config:          BreakerConfig,
    state:           BreakerState,
    trigger:         Option<TriggerRecord>,
    progress:        RecoveryProgress,
    last_assessment: Option<RecoveryAssessment>,
    history:         VecDeque<MarketSnapshot>,
    events:          Vec<BreakerEvent>,
    last_check:      Option<DateTime<Utc>>,
    misses:          u32,
    last_error:      Option<String>,
}

impl BreakerCore {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state:           BreakerState::Safe,
            trigger:         None,
            progress:        RecoveryProgress::default(),
            last_assessment: None,
            history:         VecDeque::with_capacity(64),
            events:          Vec::new(),
            last_check:      None,
            misses:          0,
            last_error:      None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn is_safe(&self) -> bool {
        self.state.is_safe()
    }

    pub fn latest_snapshot(&self) -> Option<&MarketSnapshot> {
        self.history.back()
    }

    pub fn check_crash_conditions(&self, snapshot: &MarketSnapshot) -> CrashCheck {
        check_crash_conditions(snapshot, &self.config.crash)
    }

    // ─── Periodic Evaluation (เรียกทุก monitor tick) ──────────────────────────

    pub fn evaluate(&mut self, snapshot: &MarketSnapshot) -> Evaluation {
        let first_new = self.events.len();

        self.last_check = Some(snapshot.timestamp);
        self.misses     = 0;
        self.last_error = None;
        self.history.push_back(snapshot.clone());
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }

        match self.state {
            BreakerState::Safe | BreakerState::Warning => self.watch_for_crash(snapshot),
            BreakerState::Triggered | BreakerState::Recovering => self.advance_recovery(snapshot),
        }

        Evaluation {
            state:  self.state,
            events: self.events[first_new..].to_vec(),
        }
    }

    fn watch_for_crash(&mut self, snapshot: &MarketSnapshot) {
        let check = self.check_crash_conditions(snapshot);
        if let Some(reason) = check.reason {
            self.trigger(
                reason,
                Some(snapshot.clone()),
                vec![
                    "halt_new_entries".to_string(),
                    "force_close_open_positions".to_string(),
                ],
                snapshot.timestamp,
            );
            return;
        }

        let near = rules::near_threshold(snapshot, &self.config.crash);
        match (self.state, near) {
            (BreakerState::Safe, Some(rule)) => {
                warn!(?rule, "⚠️ Circuit breaker WARNING: rule near threshold");
                self.transition(
                    BreakerEventKind::Warning,
                    BreakerState::Warning,
                    snapshot.timestamp,
                    format!("{rule:?} within warning band"),
                );
            }
            (BreakerState::Warning, None) if !snapshot.has_window_changes() => {
                debug!("Warning held: snapshot lacks benchmark window changes");
            }
            (BreakerState::Warning, None) => {
                info!("✅ Circuit breaker warning cleared");
                self.transition(
                    BreakerEventKind::WarningCleared,
                    BreakerState::Safe,
                    snapshot.timestamp,
                    "market calm again".to_string(),
                );
            }
            _ => {}
        }
    }

    fn advance_recovery(&mut self, snapshot: &MarketSnapshot) {
        let Some(triggered_at) = self.trigger.as_ref().map(|t| t.timestamp) else {
            error!(state = %self.state, "Circuit breaker has no trigger record; staying put");
            return;
        };
        let thresholds = self.config.recovery;
        self.progress.observe(snapshot);

        match recovery::stability(snapshot, &thresholds) {
            Stability::Calm => {
                if self.progress.window_started_at.is_none() {
                    self.progress.window_started_at = Some(snapshot.timestamp);
                    info!("🩹 Circuit breaker RECOVERING: stabilization window started");
                    self.transition(
                        BreakerEventKind::RecoveryStarted,
                        BreakerState::Recovering,
                        snapshot.timestamp,
                        "first calm snapshot after trigger".to_string(),
                    );
                }
            }
            Stability::RenewedDrop => {
                warn!(
                    btc_1h = ?snapshot.btc.change_1h,
                    eth_1h = ?snapshot.eth.change_1h,
                    "🔁 Renewed drop during recovery"
                );
                self.restart_stabilization(snapshot.timestamp, "renewed drop during recovery");
            }
            Stability::Unknown => {
                warn!("🔁 Snapshot lacks 1h benchmark changes; stabilization not proven");
                self.restart_stabilization(snapshot.timestamp, "no 1h change data during recovery");
            }
        }

        let assessment = recovery::assess(&self.progress, triggered_at, snapshot, &thresholds);
        let met = assessment.all_met();
        let minutes = assessment.minutes_since_trigger;
        if !met {
            debug!(unmet = ?assessment.unmet, "Recovery conditions not yet met");
        }
        self.last_assessment = Some(assessment);

        if met {
            info!(minutes, "✅ Circuit breaker auto-recovered, trading re-armed");
            let mut event = self.new_event(
                BreakerEventKind::AutoRecovered,
                BreakerState::Safe,
                snapshot.timestamp,
                "all recovery conditions met".to_string(),
            );
            event.recovery_duration_minutes = Some(minutes);
            self.push(event);
            self.clear_trigger();
        }
    }

    /// RECOVERING → TRIGGERED: the window has to start over.
    fn restart_stabilization(&mut self, at: DateTime<Utc>, message: &str) {
        if self.progress.window_started_at.take().is_some() {
            self.transition(
                BreakerEventKind::StabilizationReset,
                BreakerState::Triggered,
                at,
                message.to_string(),
            );
        }
    }

    // ─── Transitions ─────────────────────────────────────────────────────────

    /// SAFE / WARNING → TRIGGERED.  A no-op when already halted.
    pub fn trigger(
        &mut self,
        reason:        TriggerReason,
        snapshot:      Option<MarketSnapshot>,
        actions_taken: Vec<String>,
        at:            DateTime<Utc>,
    ) -> Option<BreakerEvent> {
        if self.state.forces_exit() {
            info!(state = %self.state, %reason, "Circuit breaker already halted; trigger ignored");
            return None;
        }

        let snapshot = snapshot.or_else(|| self.latest_snapshot().cloned());
        error!(%reason, "🚨 CIRCUIT BREAKER TRIGGERED");

        self.trigger  = Some(TriggerRecord { reason: reason.clone(), timestamp: at });
        self.progress = RecoveryProgress::starting_from(snapshot.as_ref());
        self.last_assessment = None;

        let mut event = self.new_event(BreakerEventKind::Triggered, BreakerState::Triggered, at, reason.to_string());
        event.reason        = Some(reason);
        event.snapshot      = snapshot;
        event.actions_taken = actions_taken;
        self.push(event.clone());
        Some(event)
    }

    /// เปิดระบบอีกครั้งแบบ manual: non-SAFE → SAFE โดยข้าม recovery checks
    pub fn resume(&mut self, capital_protected: Option<f64>, at: DateTime<Utc>) -> Option<BreakerEvent> {
        if self.state == BreakerState::Safe {
            info!("Circuit breaker already SAFE; resume ignored");
            return None;
        }

        let duration = self
            .trigger
            .as_ref()
            .map(|t| recovery::minutes_between(t.timestamp, at));
        warn!(
            from = %self.state,
            ?capital_protected,
            "🔓 Circuit breaker MANUALLY RESUMED: automatic recovery checks bypassed"
        );

        let mut event = self.new_event(
            BreakerEventKind::ManualResume,
            BreakerState::Safe,
            at,
            "manual resume, automatic recovery checks bypassed".to_string(),
        );
        event.recovery_duration_minutes = duration;
        event.capital_protected_usd     = capital_protected;
        self.push(event.clone());
        self.clear_trigger();
        Some(event)
    }

    /// Market data ดึงไม่ได้ → คง state เดิม นับจำนวนครั้งไว้อย่างเดียว
    pub fn record_unavailable(&mut self, reason: &str) {
        self.misses    += 1;
        self.last_error = Some(reason.to_string());
        warn!(
            state  = %self.state,
            misses = self.misses,
            reason,
            "⚠️ Market data unavailable; breaker state retained"
        );
    }

    fn clear_trigger(&mut self) {
        self.trigger  = None;
        self.progress = RecoveryProgress::default();
    }

    fn transition(&mut self, kind: BreakerEventKind, to: BreakerState, at: DateTime<Utc>, message: String) {
        let event = self.new_event(kind, to, at, message);
        self.push(event);
    }

    fn new_event(&self, kind: BreakerEventKind, to: BreakerState, at: DateTime<Utc>, message: String) -> BreakerEvent {
        BreakerEvent {
            event_id:   Uuid::new_v4(),
            kind,
            from_state: self.state,
            to_state:   to,
            timestamp:  at,
            reason:     None,
            message,
            snapshot:   None,
            actions_taken: Vec::new(),
            recovery_duration_minutes: None,
            capital_protected_usd:     None,
        }
    }

    fn push(&mut self, event: BreakerEvent) {
        self.state = event.to_state;
        self.events.push(event);
    }

    // ─── Audit / Status ──────────────────────────────────────────────────────

    pub fn events(&self) -> &[BreakerEvent] {
        &self.events
    }

    /// Newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<BreakerEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    pub fn statistics(&self) -> BreakerStatistics {
        let triggers: Vec<&BreakerEvent> = self
            .events
            .iter()
            .filter(|e| e.kind == BreakerEventKind::Triggered)
            .collect();
        let recoveries: Vec<f64> = self
            .events
            .iter()
            .filter(|e| matches!(e.kind, BreakerEventKind::AutoRecovered | BreakerEventKind::ManualResume))
            .filter_map(|e| e.recovery_duration_minutes)
            .collect();

        BreakerStatistics {
            total_triggers:  triggers.len(),
            auto_recoveries: self.count(BreakerEventKind::AutoRecovered),
            manual_resumes:  self.count(BreakerEventKind::ManualResume),
            avg_recovery_minutes: (!recoveries.is_empty())
                .then(|| recoveries.iter().sum::<f64>() / recoveries.len() as f64),
            total_capital_protected_usd: self
                .events
                .iter()
                .filter_map(|e| e.capital_protected_usd)
                .sum(),
            last_trigger_time:   triggers.last().map(|e| e.timestamp),
            last_trigger_reason: triggers.last().map(|e| e.message.clone()),
        }
    }

    fn count(&self, kind: BreakerEventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    pub fn status(&self, now: DateTime<Utc>) -> BreakerStatus {
        BreakerStatus {
            state:                    self.state,
            is_safe:                  self.is_safe(),
            trigger_reason:           self.trigger.as_ref().map(|t| t.reason.clone()),
            trigger_message:          self.trigger.as_ref().map(|t| t.reason.to_string()),
            trigger_time:             self.trigger.as_ref().map(|t| t.timestamp),
            stabilization_started_at: self.progress.window_started_at,
            minutes_since_trigger:    self
                .trigger
                .as_ref()
                .map(|t| recovery::minutes_between(t.timestamp, now)),
            last_check_time:          self.last_check,
            consecutive_data_misses:  self.misses,
            last_data_error:          self.last_error.clone(),
            latest_snapshot:          self.latest_snapshot().cloned(),
            last_assessment:          self.last_assessment.clone(),
            config:                   self.config,
        }
    }
}

// ─── Shared Handle ────────────────────────────────────────────────────────────

/// Cloneable handle; every read and transition goes through one lock.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerCore>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerCore::new(config))),
        }
    }

    pub async fn is_safe(&self) -> bool {
        self.inner.lock().await.is_safe()
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state()
    }

    pub async fn evaluate(&self, snapshot: &MarketSnapshot) -> Evaluation {
        self.inner.lock().await.evaluate(snapshot)
    }

    pub async fn check_crash_conditions(&self, snapshot: &MarketSnapshot) -> CrashCheck {
        self.inner.lock().await.check_crash_conditions(snapshot)
    }

    pub async fn trigger(
        &self,
        reason:        TriggerReason,
        snapshot:      Option<MarketSnapshot>,
        actions_taken: Vec<String>,
    ) -> Option<BreakerEvent> {
        let at = snapshot.as_ref().map(|s| s.timestamp).unwrap_or_else(Utc::now);
        self.inner.lock().await.trigger(reason, snapshot, actions_taken, at)
    }

    pub async fn resume(&self, capital_protected: Option<f64>) -> Option<BreakerEvent> {
        self.inner.lock().await.resume(capital_protected, Utc::now())
    }

    pub async fn record_unavailable(&self, reason: &str) {
        self.inner.lock().await.record_unavailable(reason)
    }

    pub async fn get_status(&self) -> BreakerStatus {
        self.inner.lock().await.status(Utc::now())
    }

    pub async fn recent_events(&self, limit: usize) -> Vec<BreakerEvent> {
        self.inner.lock().await.recent_events(limit)
    }

    pub async fn statistics(&self) -> BreakerStatistics {
        self.inner.lock().await.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::recovery::RecoveryCondition;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn calm(minutes: i64) -> MarketSnapshot {
        MarketSnapshot::nominal(t(minutes))
    }

    fn crash(minutes: i64) -> MarketSnapshot {
        let mut s = calm(minutes);
        s.btc.change_1h = Some(-17.5);
        s.btc.price = 49_500.0; // pre-drop ≈ 60 000
        s
    }

    fn triggered_core() -> BreakerCore {
        let mut core = BreakerCore::new(BreakerConfig::default());
        core.evaluate(&crash(0));
        core
    }

    #[test]
    fn crash_snapshot_triggers() {
        let mut core = BreakerCore::new(BreakerConfig::default());
        let eval = core.evaluate(&crash(0));
        assert_eq!(eval.state, BreakerState::Triggered);
        assert!(eval.transitioned());
        assert!(!core.is_safe());
        let event = &core.events()[0];
        assert_eq!(event.kind, BreakerEventKind::Triggered);
        assert!(event.message.starts_with("BTC dropped 17.5% in 1 hour"));
        assert_eq!(event.actions_taken.len(), 2);
    }

    #[test]
    fn calm_snapshot_stays_safe() {
        let mut core = BreakerCore::new(BreakerConfig::default());
        let eval = core.evaluate(&calm(0));
        assert_eq!(eval.state, BreakerState::Safe);
        assert!(eval.events.is_empty());
        assert!(core.is_safe());
    }

    #[test]
    fn warning_band_round_trip() {
        let mut core = BreakerCore::new(BreakerConfig::default());
        let mut near = calm(0);
        near.btc.change_1h = Some(-12.0);
        assert_eq!(core.evaluate(&near).state, BreakerState::Warning);
        assert!(!core.is_safe());
        assert_eq!(core.evaluate(&calm(1)).state, BreakerState::Safe);
        let kinds: Vec<_> = core.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![BreakerEventKind::Warning, BreakerEventKind::WarningCleared]);
    }

    #[test]
    fn trigger_while_halted_is_a_no_op() {
        let mut core = triggered_core();
        let again = core.trigger(
            TriggerReason::Manual { note: "again".into() },
            None,
            Vec::new(),
            t(1),
        );
        assert!(again.is_none());
        assert_eq!(core.events().len(), 1);
    }

    #[test]
    fn first_calm_snapshot_starts_recovery() {
        let mut core = triggered_core();
        let mut bounce = calm(1);
        bounce.btc.price = 50_000.0;
        let eval = core.evaluate(&bounce);
        assert_eq!(eval.state, BreakerState::Recovering);
        assert_eq!(core.status(t(1)).stabilization_started_at, Some(t(1)));
    }

    #[test]
    fn does_not_recover_before_window_elapses() {
        let mut core = triggered_core();
        core.evaluate(&calm(1));
        let eval = core.evaluate(&calm(20));
        assert_eq!(eval.state, BreakerState::Recovering);
        let assessment = core.status(t(20)).last_assessment.unwrap();
        assert!(assessment.unmet.contains(&RecoveryCondition::Stabilization));
    }

    #[test]
    fn recovers_when_all_conditions_hold() {
        let mut core = triggered_core();
        core.evaluate(&calm(1));
        let eval = core.evaluate(&calm(35));
        assert_eq!(eval.state, BreakerState::Safe);
        let last = core.events().last().unwrap();
        assert_eq!(last.kind, BreakerEventKind::AutoRecovered);
        assert!((last.recovery_duration_minutes.unwrap() - 35.0).abs() < 1e-9);
    }

    #[test]
    fn renewed_drop_restarts_window() {
        let mut core = triggered_core();
        core.evaluate(&calm(1));
        let mut dip = calm(20);
        dip.eth.change_1h = Some(-6.0);
        let eval = core.evaluate(&dip);
        assert_eq!(eval.state, BreakerState::Triggered);
        assert_eq!(eval.events[0].kind, BreakerEventKind::StabilizationReset);
        assert_eq!(core.status(t(20)).stabilization_started_at, None);

        assert_eq!(core.evaluate(&calm(21)).state, BreakerState::Recovering);
        // 35 min since trigger but only 14 min of calm.
        assert_eq!(core.evaluate(&calm(35)).state, BreakerState::Recovering);
        assert_eq!(core.evaluate(&calm(52)).state, BreakerState::Safe);
    }

    fn price_only(minutes: i64) -> MarketSnapshot {
        serde_json::from_value(serde_json::json!({
            "timestamp": t(minutes),
            "btc": { "price": 60_000.0 },
            "eth": { "price": 3_000.0 },
        }))
        .unwrap()
    }

    #[test]
    fn price_only_snapshot_keeps_warning() {
        let mut core = BreakerCore::new(BreakerConfig::default());
        let mut near = calm(0);
        near.btc.change_1h = Some(-12.0);
        core.evaluate(&near);

        let eval = core.evaluate(&price_only(1));
        assert_eq!(eval.state, BreakerState::Warning);
        assert!(eval.events.is_empty());
        assert_eq!(core.evaluate(&calm(2)).state, BreakerState::Safe);
    }

    #[test]
    fn price_only_snapshot_does_not_start_recovery() {
        let mut core = triggered_core();
        let eval = core.evaluate(&price_only(1));
        assert_eq!(eval.state, BreakerState::Triggered);
        assert_eq!(core.status(t(1)).stabilization_started_at, None);
        let assessment = core.status(t(1)).last_assessment.unwrap();
        assert!(assessment.unmet.contains(&RecoveryCondition::Stabilization));
    }

    #[test]
    fn price_only_snapshot_restarts_window() {
        let mut core = triggered_core();
        core.evaluate(&calm(1));
        assert_eq!(core.evaluate(&price_only(10)).state, BreakerState::Triggered);

        core.evaluate(&calm(11));
        // 40 min since trigger but only 29 min of observed calm.
        assert_eq!(core.evaluate(&calm(40)).state, BreakerState::Recovering);
        assert_eq!(core.evaluate(&calm(41)).state, BreakerState::Safe);
    }

    #[test]
    fn low_volume_blocks_recovery() {
        let mut core = triggered_core();
        core.evaluate(&calm(1));
        let mut thin = calm(40);
        thin.volume_1h = Some(500.0);
        assert_eq!(core.evaluate(&thin).state, BreakerState::Recovering);
    }

    #[test]
    fn manual_resume_is_logged_distinctly() {
        let mut core = triggered_core();
        let event = core.resume(Some(12_500.0), t(10)).unwrap();
        assert_eq!(event.kind, BreakerEventKind::ManualResume);
        assert_eq!(event.from_state, BreakerState::Triggered);
        assert!(core.is_safe());
        assert!(core.resume(None, t(11)).is_none());

        let stats = core.statistics();
        assert_eq!(stats.total_triggers, 1);
        assert_eq!(stats.manual_resumes, 1);
        assert_eq!(stats.total_capital_protected_usd, 12_500.0);
        assert_eq!(stats.avg_recovery_minutes, Some(10.0));
    }

    #[test]
    fn data_outage_retains_state() {
        let mut core = triggered_core();
        core.record_unavailable("timeout");
        core.record_unavailable("timeout");
        let status = core.status(t(5));
        assert_eq!(status.state, BreakerState::Triggered);
        assert_eq!(status.consecutive_data_misses, 2);

        let mut safe = BreakerCore::new(BreakerConfig::default());
        safe.record_unavailable("connection refused");
        assert_eq!(safe.state(), BreakerState::Safe);
    }

    #[test]
    fn history_is_bounded() {
        let mut core = BreakerCore::new(BreakerConfig::default());
        for i in 0..1_100 {
            core.evaluate(&calm(i));
        }
        assert_eq!(core.history.len(), HISTORY_CAPACITY);
        assert_eq!(core.latest_snapshot().unwrap().timestamp, t(1_099));
    }

    #[test]
    fn recent_events_are_newest_first() {
        let mut core = triggered_core();
        core.resume(None, t(3));
        let recent = core.recent_events(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, BreakerEventKind::ManualResume);
    }

    #[tokio::test]
    async fn shared_handle_serialises_access() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        assert!(breaker.is_safe().await);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let b = breaker.clone();
                tokio::spawn(async move { b.evaluate(&crash(i)).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(breaker.state().await, BreakerState::Triggered);
        assert_eq!(breaker.statistics().await.total_triggers, 1);
        assert!(breaker.resume(None).await.is_some());
        assert!(breaker.is_safe().await);
    }
}
