//! HTTP advisor backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{AdvisorBackend, Recommendation, TaskContext};
use crate::error::AdvisorError;

/// Posts the task context as JSON and reads a [`Recommendation`] back.
#[derive(Debug, Clone)]
pub struct HttpAdvisor {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAdvisor {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AdvisorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdvisorError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn map_reqwest(err: reqwest::Error) -> AdvisorError {
    if err.is_timeout() {
        AdvisorError::Timeout
    } else if err.is_decode() {
        AdvisorError::InvalidResponse(err.to_string())
    } else {
        AdvisorError::Transport(err.to_string())
    }
}

#[async_trait]
impl AdvisorBackend for HttpAdvisor {
    async fn recommend(&self, context: &TaskContext) -> Result<Recommendation, AdvisorError> {
        let mut request = self.client.post(&self.endpoint).json(context);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AdvisorError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let recommendation: Recommendation = response.json().await.map_err(map_reqwest)?;
        recommendation.validate()?;
        Ok(recommendation)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;
    use tendril_core::{Frequency, TaskType, Unit};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn context() -> TaskContext {
        TaskContext {
            crop_id: "pepper-7".to_string(),
            task_type: TaskType::Fertilizer,
            frequency: Frequency::Weekly,
            unit: Unit::Grams,
        }
    }

    fn advisor(server: &MockServer, api_key: Option<&str>) -> HttpAdvisor {
        HttpAdvisor::new(
            format!("{}/recommend/", server.uri()),
            api_key.map(str::to_owned),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn posts_context_and_parses_recommendation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recommend"))
            .and(body_partial_json(json!({
                "cropId": "pepper-7",
                "taskType": "fertilizer",
                "unit": "g"
            })))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "amount": 25.0,
                "timing": "07:30",
                "confidence": 0.82
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rec = advisor(&server, Some("secret"))
            .recommend(&context())
            .await
            .unwrap();

        assert_eq!(rec.amount, Some(25.0));
        assert_eq!(rec.timing.as_deref(), Some("07:30"));
        assert!((rec.confidence - 0.82).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn server_error_is_retryable_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = advisor(&server, None)
            .recommend(&context())
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            AdvisorError::Status { status: 503, message } if message == "overloaded"
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn client_error_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let err = advisor(&server, None)
            .recommend(&context())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = advisor(&server, None)
            .recommend(&context())
            .await
            .unwrap_err();
        assert!(matches!(err, AdvisorError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn slow_advisor_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"confidence": 0.9}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let advisor = HttpAdvisor::new(server.uri(), None, Duration::from_millis(100)).unwrap();
        let err = advisor.recommend(&context()).await.unwrap_err();
        assert!(matches!(err, AdvisorError::Timeout));
    }
}
