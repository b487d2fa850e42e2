//! Message relay between the two sides of a session.

use chrono::Utc;
use tracing::{debug, warn};

use super::{SessionEngine, SessionError};
use crate::notify::{Notice, Outbound};
use crate::types::{Payload, SessionState, User, UserPatch};

impl SessionEngine {
    /// Forward `payload` from `sender` to its partner.
    ///
    /// Delivery happens under both users' locks, so nothing is delivered
    /// after the session has been torn down. Returns the notice to show the
    /// sender, `None` when the message went through.
    pub(crate) async fn relay(
        &self,
        sender: &User,
        payload: Payload,
    ) -> Result<Option<Notice>, SessionError> {
        let id = sender.id;
        let outcome = {
            let (_held, user) = self.lock_with_partner(id).await?;
            if user.state != SessionState::Chatting {
                // Moved on between routing and locking.
                return Ok(Some(Notice::NotInChat));
            }
            let partner = match user.partner_id {
                Some(partner_id) => self
                    .store
                    .get_user(partner_id)
                    .await?
                    .filter(|p| p.is_partnered_with(id) && p.state.in_session()),
                None => None,
            };
            match partner {
                None => None,
                Some(partner) if partner.state == SessionState::Reporting => {
                    Some(Some(Notice::PartnerBusy))
                }
                Some(partner) => {
                    let kind = match &payload {
                        Payload::Text(_) => "text",
                        Payload::Media { kind, .. } => kind.as_str(),
                    };
                    let msg = Outbound::relay(partner.id, id, payload);
                    if let Err(e) = self.notifier.deliver(msg).await {
                        warn!(from = %id, to = %partner.id, error = %e, "relay failed");
                        Some(Some(Notice::DeliveryFailed))
                    } else {
                        debug!(from = %id, to = %partner.id, kind, "message relayed");
                        let now = Utc::now();
                        let touch = [
                            (id, UserPatch::default().touched(now)),
                            (partner.id, UserPatch::default().touched(now)),
                        ];
                        if let Err(e) = self.store.update_users(&touch).await {
                            warn!(user = %id, error = %e, "failed to record activity");
                        }
                        Some(None)
                    }
                }
            }
        };

        match outcome {
            Some(result) => Ok(result),
            None => {
                self.repair_stale_link(id).await?;
                Err(SessionError::NoPartner)
            }
        }
    }
}
