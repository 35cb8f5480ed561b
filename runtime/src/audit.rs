//! Reconciliation workflow: physical audit sessions driven through the
//! ledger.
//!
//! Sessions are persisted after every transition. Adjustments produced by an
//! approval are committed in the same store transaction as the session's new
//! status, so a session never claims `approved` without its adjustments, and
//! vice versa.

use crate::locks::LockKey;
use crate::metrics::LedgerMetrics;
use crate::service::LedgerService;
use dishware_ledger_core::item::{InventoryItem, LifecycleStatus};
use dishware_ledger_core::ledger_store::{ItemCommit, LedgerCommit};
use dishware_ledger_core::movement::{MovementCategory, ReasonCode};
use dishware_ledger_core::pipeline::{self, MovementContext};
use dishware_ledger_core::policy::{Policy, PolicyAction};
use dishware_ledger_core::reconciliation::{AuditSession, AuditStatus};
use dishware_ledger_core::types::{AuditSessionId, ItemId, Role, UserId};
use dishware_ledger_core::{LedgerError, Result};
use std::collections::BTreeMap;

impl LedgerService {
    /// Open a draft audit session over `item_ids`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] for an empty/duplicated list or an
    /// archived item, [`LedgerError::NotFound`] for unknown items.
    #[tracing::instrument(skip(self, item_ids), fields(items = item_ids.len()))]
    pub async fn create_audit_session(&self, item_ids: &[ItemId], actor: UserId) -> Result<AuditSession> {
        Policy::authorize(PolicyAction::CountStock, None, self.role_of(actor))?;
        for item_id in item_ids {
            let item = self.live_item(*item_id).await?;
            if item.lifecycle_status == LifecycleStatus::Archived {
                return Err(LedgerError::validation(format!("Item {item_id} is archived")));
            }
        }

        let session = AuditSession::create(AuditSessionId::new(), item_ids, actor, self.clock.now())?;
        self.store.save_audit_session(session.clone()).await?;
        tracing::info!(session_id = %session.id, "Audit session created");
        Ok(session)
    }

    /// draft → counting; captures each item's `available` as its book quantity.
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] outside draft.
    #[tracing::instrument(skip(self), fields(session_id = %session_id))]
    pub async fn start_counting(&self, session_id: AuditSessionId, actor: UserId) -> Result<AuditSession> {
        Policy::authorize(PolicyAction::CountStock, None, self.role_of(actor))?;
        let session = self.audit_session(session_id).await?;
        let _locks = self.locks.acquire(session_keys(&session)).await;

        let session = self.audit_session(session_id).await?;
        let items = self.load_session_items(&session).await?;
        let next = session.start_counting(|id| items.get(&id).map(|item| item.stock.available), self.clock.now())?;
        self.save_transition(next).await
    }

    /// Enter the physical count for one line.
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] outside counting, [`LedgerError::Validation`]
    /// for negative counts or items outside the session.
    #[tracing::instrument(skip(self, notes), fields(session_id = %session_id, item_id = %item_id))]
    pub async fn record_count(
        &self,
        session_id: AuditSessionId,
        item_id: ItemId,
        physical: i64,
        reason_code: Option<ReasonCode>,
        notes: Option<String>,
        actor: UserId,
    ) -> Result<AuditSession> {
        Policy::authorize(PolicyAction::CountStock, None, self.role_of(actor))?;
        let _locks = self.locks.acquire([LockKey::AuditSession(session_id)]).await;

        let session = self.audit_session(session_id).await?;
        let next = session.record_count(item_id, physical, reason_code, notes, self.clock.now())?;
        self.store.save_audit_session(next.clone()).await?;
        Ok(next)
    }

    /// counting → review → auto_approved | pending_approval.
    ///
    /// Auto-approved sessions have their adjustment movements committed
    /// immediately, attributed to the submitter.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] for uncounted lines or missing reasons,
    /// any pipeline error if an auto-approved adjustment is refused (the
    /// session then stays in counting).
    #[tracing::instrument(skip(self), fields(session_id = %session_id))]
    pub async fn submit_for_review(&self, session_id: AuditSessionId, actor: UserId) -> Result<AuditSession> {
        let role = self.role_of(actor);
        Policy::authorize(PolicyAction::CountStock, None, role)?;
        let session = self.audit_session(session_id).await?;
        let _locks = self.locks.acquire(session_keys(&session)).await;

        let session = self.audit_session(session_id).await?;
        let now = self.clock.now();
        let reviewed = session.submit(actor, now)?;
        let items = self.load_session_items(&reviewed).await?;

        // Locked adjustments the submitter cannot record go to an admin.
        let needs_elevation = reviewed.adjustments(actor).iter().any(|adjustment| {
            items.get(&adjustment.item_id).is_some_and(|item| {
                let locked = item.opening_balance_locked(now, self.settings.opening_balance_auto_confirm_days);
                Policy::authorize(
                    PolicyAction::RecordMovement {
                        category: MovementCategory::Adjustment,
                        locked,
                    },
                    Some(item.lifecycle_status),
                    role,
                )
                .is_err()
            })
        });
        let routed = reviewed.route(&self.settings, needs_elevation, now)?;

        if routed.status == AuditStatus::AutoApproved {
            self.commit_adjustments(routed, actor, role, &items).await
        } else {
            self.save_transition(routed).await
        }
    }

    /// pending_approval → approved, committing one adjustment per
    /// nonzero-variance line.
    ///
    /// Every line is validated against current stock before anything is
    /// committed. If any line is refused nothing is written and the session
    /// stays pending.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Authorization`] below admin, [`LedgerError::State`]
    /// outside pending_approval, or the first pipeline error.
    #[tracing::instrument(skip(self), fields(session_id = %session_id))]
    pub async fn approve_audit(&self, session_id: AuditSessionId, actor: UserId) -> Result<AuditSession> {
        let role = self.role_of(actor);
        Policy::authorize(PolicyAction::ApproveAudit, None, role)?;
        let session = self.audit_session(session_id).await?;
        let _locks = self.locks.acquire(session_keys(&session)).await;

        let session = self.audit_session(session_id).await?;
        let approved = session.approve(actor, self.clock.now())?;
        let items = self.load_session_items(&approved).await?;
        self.commit_adjustments(approved, actor, role, &items).await
    }

    /// pending_approval → rejected; nothing is emitted.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Authorization`] below admin, [`LedgerError::State`]
    /// outside pending_approval.
    #[tracing::instrument(skip(self, reason), fields(session_id = %session_id))]
    pub async fn reject_audit(
        &self,
        session_id: AuditSessionId,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<AuditSession> {
        Policy::authorize(PolicyAction::ApproveAudit, None, self.role_of(actor))?;
        let _locks = self.locks.acquire([LockKey::AuditSession(session_id)]).await;

        let session = self.audit_session(session_id).await?;
        let rejected = session.reject(actor, reason, self.clock.now())?;
        self.save_transition(rejected).await
    }

    /// approved / auto_approved / rejected → closed.
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] from any other status.
    #[tracing::instrument(skip(self), fields(session_id = %session_id))]
    pub async fn close_audit(&self, session_id: AuditSessionId, actor: UserId) -> Result<AuditSession> {
        Policy::authorize(PolicyAction::CountStock, None, self.role_of(actor))?;
        let _locks = self.locks.acquire([LockKey::AuditSession(session_id)]).await;

        let session = self.audit_session(session_id).await?;
        let closed = session.close(self.clock.now())?;
        self.save_transition(closed).await
    }

    /// Load an audit session.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown id.
    pub async fn audit_session(&self, session_id: AuditSessionId) -> Result<AuditSession> {
        self.store
            .load_audit_session(session_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("Audit session {session_id}")))
    }

    async fn load_session_items(&self, session: &AuditSession) -> Result<BTreeMap<ItemId, InventoryItem>> {
        let mut items = BTreeMap::new();
        for item_id in session.item_ids() {
            items.insert(item_id, self.live_item(item_id).await?);
        }
        Ok(items)
    }

    /// Run every adjustment of `session` through the pipeline, then commit
    /// them together with the session.
    async fn commit_adjustments(
        &self,
        session: AuditSession,
        actor: UserId,
        role: Option<Role>,
        items: &BTreeMap<ItemId, InventoryItem>,
    ) -> Result<AuditSession> {
        let ctx = MovementContext {
            role,
            now: self.clock.now(),
            settings: &self.settings,
        };

        let mut commit = LedgerCommit::default();
        for adjustment in session.adjustments(actor) {
            let item = items
                .get(&adjustment.item_id)
                .ok_or_else(|| LedgerError::not_found(format!("Item {}", adjustment.item_id)))?;
            let recorded = pipeline::record_movement(item, None, adjustment, &ctx).inspect_err(|error| {
                tracing::warn!(item_id = %item.id, %error, "Audit adjustment refused; nothing committed");
            })?;
            commit
                .items
                .push(ItemCommit::item(item.version, recorded.item).with_movement(recorded.movement));
        }

        let adjustments = commit.items.len();
        self.store.commit(commit.with_audit_session(session.clone())).await?;
        LedgerMetrics::record_audit(session.status);
        tracing::info!(status = %session.status, adjustments, "Audit adjustments committed");
        Ok(session)
    }

    async fn save_transition(&self, session: AuditSession) -> Result<AuditSession> {
        self.store.save_audit_session(session.clone()).await?;
        LedgerMetrics::record_audit(session.status);
        tracing::info!(session_id = %session.id, status = %session.status, "Audit session transition");
        Ok(session)
    }
}

fn session_keys(session: &AuditSession) -> Vec<LockKey> {
    session
        .item_ids()
        .map(LockKey::Item)
        .chain(std::iter::once(LockKey::AuditSession(session.id)))
        .collect()
}
