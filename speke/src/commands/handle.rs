use super::ServerArgs;
use anyhow::Result;
use base64::Engine;
use clap::Args;
use serde::{Deserialize, Serialize};
use speke_cpix::{Error, KeyServer, Response};
use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

/// Answer an API gateway proxy event and print the proxy response.
///
/// Events with `content_id` and `kid` path parameters are clear key
/// requests, everything else is a CPIX request whose protocol version is
/// taken from the `X-Speke-Version` header.
#[derive(Debug, Clone, Args)]
pub struct Handle {
    /// Path of the JSON event, `-` reads stdin.
    #[arg(required = true)]
    input: PathBuf,

    #[command(flatten)]
    server: ServerArgs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Event {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    is_base64_encoded: bool,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    path_parameters: Option<HashMap<String, String>>,
}

impl Event {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn client_key(&self) -> Option<(&str, &str)> {
        let parameters = self.path_parameters.as_ref()?;
        Some((parameters.get("content_id")?, parameters.get("kid")?))
    }

    fn body(&self) -> std::result::Result<Vec<u8>, Error> {
        let body = self.body.as_deref().unwrap_or_default();

        if self.is_base64_encoded {
            Ok(base64::engine::general_purpose::STANDARD.decode(body.trim())?)
        } else {
            Ok(body.as_bytes().to_vec())
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    status_code: u16,
    headers: BTreeMap<String, String>,
    body: String,
    is_base64_encoded: bool,
}

impl From<Response> for EventResponse {
    fn from(response: Response) -> Self {
        Self {
            status_code: response.status,
            body: response.body_text(),
            headers: response.headers.into_iter().collect(),
            is_base64_encoded: response.is_base64_encoded,
        }
    }
}

impl Handle {
    pub fn execute(self) -> Result<()> {
        let event = serde_json::from_slice::<Event>(&super::read_input(&self.input)?)?;
        let response = Self::dispatch(&self.server.server()?, &event);
        println!("{}", serde_json::to_string_pretty(&EventResponse::from(response))?);
        Ok(())
    }

    fn dispatch(server: &KeyServer, event: &Event) -> Response {
        if let Some((content_id, kid)) = event.client_key() {
            return server.client_key(content_id, kid);
        }

        match event.body() {
            Ok(body) => server.handle(event.header("X-Speke-Version"), &body),
            Err(e) => Response::error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speke_cpix::{
        ServerConfig,
        keys::{MemoryBlobStore, MemorySecretStore},
    };
    use std::sync::Arc;

    const KID: &str = "6c5f5206-7d98-4808-84d8-94f132c1e9fe";

    fn server() -> KeyServer {
        KeyServer::new(
            ServerConfig::builder()
                .keystore_url("https://keys.example.com/client")
                .build()
                .unwrap(),
            Arc::new(MemorySecretStore::new()),
            Arc::new(MemoryBlobStore::new()),
        )
    }

    fn event(json: serde_json::Value) -> Event {
        serde_json::from_value(json).unwrap()
    }

    fn request(root: &str) -> String {
        format!(
            r#"<cpix:CPIX {} xmlns:cpix="urn:dashif:org:cpix"><cpix:ContentKeyList><cpix:ContentKey kid="{}"/></cpix:ContentKeyList></cpix:CPIX>"#,
            root, KID
        )
    }

    #[test]
    fn test_base64_cpix_event() {
        let body = base64::engine::general_purpose::STANDARD.encode(request(r#"id="movie-1""#));
        let response = EventResponse::from(Handle::dispatch(
            &server(),
            &event(serde_json::json!({
                "httpMethod": "POST",
                "headers": { "content-type": "application/xml" },
                "body": body,
                "isBase64Encoded": true,
            })),
        ));

        assert_eq!(response.status_code, 200);
        assert!(response.body.contains("PlainValue"));
        assert!(response.headers.contains_key("Speke-User-Agent"));
        assert!(!response.is_base64_encoded);
    }

    #[test]
    fn test_version_header() {
        let response = Handle::dispatch(
            &server(),
            &event(serde_json::json!({
                "headers": { "x-speke-version": "2.0" },
                "body": request(r#"contentId="movie-1""#),
            })),
        );

        // SPEKE 2.0 requests are validated, this one lacks the version attribute.
        assert_eq!(response.status, 400);
    }

    #[test]
    fn test_client_key_event() {
        let server = server();
        let get = event(serde_json::json!({
            "httpMethod": "GET",
            "pathParameters": { "content_id": "movie-1", "kid": KID },
            "body": "",
            "isBase64Encoded": false,
        }));

        // No key was issued for movie-1 yet.
        assert_eq!(Handle::dispatch(&server, &get).status, 404);

        let issued = Handle::dispatch(
            &server,
            &event(serde_json::json!({ "body": request(r#"id="movie-1""#) })),
        );
        assert_eq!(issued.status, 200);

        let response = EventResponse::from(Handle::dispatch(&server, &get));
        assert_eq!(response.status_code, 200);
        assert!(response.is_base64_encoded);
        assert_eq!(
            response.headers.get("Content-Type").map(String::as_str),
            Some("application/octet-stream")
        );
        assert_eq!(
            response.body,
            server.client_key("movie-1", KID).body_text()
        );
    }

    #[test]
    fn test_bad_body() {
        let response = Handle::dispatch(
            &server(),
            &event(serde_json::json!({ "body": "%%%", "isBase64Encoded": true })),
        );
        assert_eq!(response.status, 400);

        let response = Handle::dispatch(&server(), &Event::default());
        assert_eq!(response.status, 400);
    }

    #[test]
    fn test_response_json() {
        let json = serde_json::to_value(EventResponse::from(Response {
            status: 200,
            headers: vec![("Content-Type".to_owned(), "application/xml".to_owned())],
            body: b"<xml/>".to_vec(),
            is_base64_encoded: false,
        }))
        .unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "statusCode": 200,
                "headers": { "Content-Type": "application/xml" },
                "body": "<xml/>",
                "isBase64Encoded": false,
            })
        );
    }
}
