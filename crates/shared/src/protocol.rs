use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{Revision, SessionState, SubmissionSeq},
    error::ApiError,
};

/// A point-in-time copy of the authoritative session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub revision: Revision,
    pub submission_seq: SubmissionSeq,
    pub state: SessionState,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn initial() -> Self {
        Self {
            revision: Revision(0),
            submission_seq: SubmissionSeq(0),
            state: SessionState::default(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    Submit { prompt: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    StateChanged { snapshot: SessionSnapshot },
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_round_trips_through_json() {
        let mut snapshot = SessionSnapshot::initial();
        snapshot.revision = Revision(3);
        snapshot.state.status = Some("Generating skybox...".into());

        let text = serde_json::to_string(&ServerEvent::StateChanged {
            snapshot: snapshot.clone(),
        })
        .expect("json");
        let decoded: ServerEvent = serde_json::from_str(&text).expect("decode");
        let ServerEvent::StateChanged { snapshot: decoded } = decoded else {
            panic!("expected state event");
        };
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn empty_state_omits_unset_fields() {
        let json = serde_json::to_value(SessionState::default()).expect("json");
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn error_event_carries_code() {
        let json = serde_json::to_value(ServerEvent::Error(ApiError::rate_limited(
            "Wait 3 seconds",
        )))
        .expect("json");
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["code"], "rate_limited");
    }
}
