// Access token validation

use reqwest::Client;

/// Gateway verdict on an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Rejected { status: u16, message: String },
}

/// Ask the gateway whether `access_token` is still accepted
///
/// A non-2xx answer is a `Rejected` verdict. Failing to reach the gateway
/// is an error, not a verdict.
pub async fn validate_token(
    client: &Client,
    base_url: &str,
    access_token: &str,
) -> Result<Validation, reqwest::Error> {
    let url = format!("{}/validate", base_url.trim_end_matches('/'));

    let response = client.get(&url).header("token", access_token).send().await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Ok(Validation::Rejected {
            status: status.as_u16(),
            message: error_text,
        });
    }

    Ok(Validation::Valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_ok() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/validate")
            .match_header("token", "A1")
            .with_status(200)
            .create_async()
            .await;

        let verdict = validate_token(&Client::new(), &server.url(), "A1").await.unwrap();
        mock.assert_async().await;
        assert_eq!(verdict, Validation::Valid);
    }

    #[tokio::test]
    async fn test_validate_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/validate")
            .with_status(401)
            .with_body("invalid")
            .create_async()
            .await;

        let verdict = validate_token(&Client::new(), &server.url(), "A1").await.unwrap();
        assert_eq!(
            verdict,
            Validation::Rejected {
                status: 401,
                message: "invalid".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_validate_unreachable_is_an_error() {
        let result = validate_token(&Client::new(), "http://127.0.0.1:9", "A1").await;
        assert!(result.is_err());
    }
}
