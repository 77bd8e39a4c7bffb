//! Consultation side-channel: one authenticated REST submission tied to the
//! session's external appointment, independent of the signaling transport.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthContext;

/// External appointment identifier; carried alongside the room id, never
/// derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(String);

impl AppointmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationEntry {
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl MedicationEntry {
    /// An entry is submittable only when every required field is populated;
    /// instructions stay optional.
    pub fn is_complete(&self) -> bool {
        !self.medication_name.is_empty()
            && !self.dosage.is_empty()
            && !self.frequency.is_empty()
            && !self.duration.is_empty()
            && self.quantity > 0
    }
}

/// Locally edited consultation output; cleared after a successful
/// submission.
#[derive(Debug, Clone, Default)]
pub struct ConsultationDraft {
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    /// ISO-8601 expiry of the prescription; callers usually default this to
    /// thirty days out.
    pub expiry_date: Option<String>,
    pub medications: Vec<MedicationEntry>,
}

impl ConsultationDraft {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// The entries that survive validation. Incomplete entries are silently
    /// dropped rather than failing the whole submission.
    pub fn submittable_medications(&self) -> Vec<&MedicationEntry> {
        self.medications
            .iter()
            .filter(|entry| entry.is_complete())
            .collect()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsultationPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnosis: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry_date: &'a Option<String>,
    medications: Vec<&'a MedicationEntry>,
}

#[derive(Debug, Error)]
pub enum ConsultationError {
    #[error("only the clinician may submit a consultation")]
    Unauthorized,

    #[error("consultation draft not submittable: {0}")]
    InvalidDraft(String),

    #[error("consultation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("consultation rejected by server: {status}")]
    Api { status: reqwest::StatusCode },
}

impl ConsultationError {
    /// Whether the caller may simply retry the same submission. Failures
    /// never affect call state either way.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConsultationError::Http(_) => true,
            ConsultationError::Api { status } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// REST client for consultation submissions.
pub struct ConsultationClient {
    http: reqwest::Client,
    api_url: String,
}

impl ConsultationClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    /// Submit the draft for `appointment`. On success the draft is cleared;
    /// on failure it is left intact so the caller can retry.
    pub async fn submit(
        &self,
        auth: &AuthContext,
        appointment: &AppointmentId,
        draft: &mut ConsultationDraft,
    ) -> Result<(), ConsultationError> {
        if !auth.role().is_clinician() {
            return Err(ConsultationError::Unauthorized);
        }
        if appointment.as_str().is_empty() {
            return Err(ConsultationError::InvalidDraft(
                "missing appointment id".into(),
            ));
        }

        let medications = draft.submittable_medications();
        let dropped = draft.medications.len() - medications.len();
        if dropped > 0 {
            tracing::debug!(target = "consult", dropped, "dropped incomplete medication entries");
        }

        let url = format!(
            "{}/prescriptions/consultation/{}",
            self.api_url.trim_end_matches('/'),
            appointment
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&auth.token)
            .json(&ConsultationPayload {
                diagnosis: &draft.diagnosis,
                notes: &draft.notes,
                expiry_date: &draft.expiry_date,
                medications,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConsultationError::Api { status });
        }

        tracing::info!(target = "consult", appointment = %appointment, "consultation submitted");
        draft.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Role, UserProfile};
    use axum::extract::{Path, State};
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::sync::mpsc;

    fn auth_for(role: Role) -> AuthContext {
        AuthContext {
            token: "bearer-token".into(),
            user: UserProfile {
                id: "d1".into(),
                user_name: "dr".into(),
                role,
            },
        }
    }

    fn draft_with_mixed_entries() -> ConsultationDraft {
        ConsultationDraft {
            diagnosis: Some("Acute pulpitis".into()),
            notes: None,
            expiry_date: Some("2026-09-05T00:00:00Z".into()),
            medications: vec![
                MedicationEntry {
                    medication_name: "Amoxicillin".into(),
                    dosage: "500mg".into(),
                    frequency: "3x daily".into(),
                    duration: "7 days".into(),
                    quantity: 21,
                    instructions: Some("after meals".into()),
                },
                MedicationEntry {
                    medication_name: "Ibuprofen".into(),
                    dosage: "400mg".into(),
                    frequency: "as needed".into(),
                    duration: "5 days".into(),
                    quantity: 0,
                    instructions: None,
                },
            ],
        }
    }

    #[test]
    fn incomplete_entries_are_dropped_silently() {
        let draft = draft_with_mixed_entries();
        let submittable = draft.submittable_medications();
        assert_eq!(submittable.len(), 1);
        assert_eq!(submittable[0].medication_name, "Amoxicillin");
    }

    #[tokio::test]
    async fn non_clinicians_cannot_submit() {
        let client = ConsultationClient::new("http://127.0.0.1:1");
        let mut draft = draft_with_mixed_entries();
        let err = client
            .submit(
                &auth_for(Role::Patient),
                &AppointmentId::new("appt-1"),
                &mut draft,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConsultationError::Unauthorized));
        assert!(!err.is_retryable());
    }

    async fn spawn_api(
        responder: axum::http::StatusCode,
    ) -> (String, mpsc::UnboundedReceiver<(String, serde_json::Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route(
                "/prescriptions/consultation/:id",
                post(
                    move |State(tx): State<
                        mpsc::UnboundedSender<(String, serde_json::Value)>,
                    >,
                          Path(id): Path<String>,
                          Json(body): Json<serde_json::Value>| async move {
                        let _ = tx.send((id, body));
                        responder
                    },
                ),
            )
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), rx)
    }

    #[tokio::test]
    async fn successful_submission_filters_entries_and_clears_draft() {
        let (api_url, mut requests) = spawn_api(axum::http::StatusCode::OK).await;
        let client = ConsultationClient::new(api_url);
        let mut draft = draft_with_mixed_entries();

        client
            .submit(
                &auth_for(Role::Dentist),
                &AppointmentId::new("appt-42"),
                &mut draft,
            )
            .await
            .unwrap();

        let (id, body) = requests.recv().await.unwrap();
        assert_eq!(id, "appt-42");
        assert_eq!(body["medications"].as_array().unwrap().len(), 1);
        assert_eq!(body["medications"][0]["medicationName"], "Amoxicillin");
        assert_eq!(body["diagnosis"], "Acute pulpitis");
        assert!(draft.medications.is_empty());
        assert!(draft.diagnosis.is_none());
    }

    #[tokio::test]
    async fn server_failure_is_retryable_and_preserves_draft() {
        let (api_url, _requests) = spawn_api(axum::http::StatusCode::INTERNAL_SERVER_ERROR).await;
        let client = ConsultationClient::new(api_url);
        let mut draft = draft_with_mixed_entries();

        let err = client
            .submit(
                &auth_for(Role::Dentist),
                &AppointmentId::new("appt-42"),
                &mut draft,
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(draft.medications.len(), 2);
    }
}
