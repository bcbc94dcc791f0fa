//! Server capability probing and sitemap listing

use std::time::Duration;

use habsync_core::{parse_sitemaps_json, parse_sitemaps_xml, ServerFlags, ServerProperties, Sitemap};
use tracing::{debug, info};

use crate::connection::{Connection, HttpRequest};
use crate::error::HttpError;

/// Probe `rest` for capabilities, then list the sitemaps.
pub async fn fetch_server_properties<C>(
    connection: &C,
    timeout: Duration,
) -> Result<ServerProperties, HttpError>
where
    C: Connection + Sync,
{
    let url = connection.build_url("rest")?;
    let response = connection.get(HttpRequest::new(url, timeout)).await?;
    let flags = ServerFlags::from_root_document(&response.body)
        .map_err(|e| HttpError::new(response.url.as_str(), response.status, e.to_string()))?;
    info!("Server capabilities: {:?}", flags);

    let sitemaps = fetch_sitemaps(connection, flags, timeout).await?;
    Ok(ServerProperties::new(flags, sitemaps))
}

/// Refresh only the sitemap list for already known capabilities.
pub async fn fetch_sitemaps<C>(
    connection: &C,
    flags: ServerFlags,
    timeout: Duration,
) -> Result<Vec<Sitemap>, HttpError>
where
    C: Connection + Sync,
{
    let url = connection.build_url("rest/sitemaps")?;
    let mut request = HttpRequest::new(url, timeout);
    if !flags.contains(ServerFlags::JSON_REST_API) {
        request = request.header("Accept", "application/xml");
    }
    let response = connection.get(request).await?;

    let sitemaps = if flags.contains(ServerFlags::JSON_REST_API) {
        parse_sitemaps_json(&response.body)
    } else {
        parse_sitemaps_xml(&response.body)
    };
    debug!("Server returned {} sitemap(s)", sitemaps.len());
    Ok(sitemaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeConnection;
    use tokio_test::{assert_err, assert_ok};

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_fetch_json_server() {
        let (connection, mut server) = FakeConnection::new("http://demo:8080/");
        let fetch = tokio::spawn(async move { fetch_server_properties(&connection, TIMEOUT).await });

        let root = server.next_get().await.unwrap();
        assert_eq!(root.request.url.as_str(), "http://demo:8080/rest");
        root.respond(r#"{"version":"2","links":[{"type":"habpanel"}]}"#);

        let list = server.next_get().await.unwrap();
        assert_eq!(list.request.url.as_str(), "http://demo:8080/rest/sitemaps");
        assert_eq!(list.request.header_value("Accept"), None);
        list.respond(r#"[{"name":"demo","homepage":{"link":"http://demo:8080/rest/sitemaps/demo/demo"}}]"#);

        let props = assert_ok!(fetch.await.unwrap());
        assert!(props.has_sse_support());
        assert!(props.has_invisible_widget_support());
        assert!(props.has_habpanel_installed());
        assert_eq!(props.sitemaps.len(), 1);
        assert_eq!(props.sitemap("demo").unwrap().label, "demo");
    }

    #[tokio::test]
    async fn test_fetch_legacy_server() {
        let (connection, mut server) = FakeConnection::new("http://demo:8080/");
        let fetch = tokio::spawn(async move { fetch_server_properties(&connection, TIMEOUT).await });

        server
            .next_get()
            .await
            .unwrap()
            .respond("<?xml version=\"1.0\"?><links/>");
        let list = server.next_get().await.unwrap();
        assert_eq!(list.request.header_value("accept"), Some("application/xml"));
        list.respond(
            "<sitemaps><sitemap><name>demo</name>\
             <homepage><link>http://demo:8080/rest/sitemaps/demo/demo</link></homepage>\
             </sitemap></sitemaps>",
        );

        let props = assert_ok!(fetch.await.unwrap());
        assert!(!props.has_json_api());
        assert_eq!(props.sitemaps[0].name, "demo");
    }

    #[tokio::test]
    async fn test_fetch_propagates_http_failure() {
        let (connection, mut server) = FakeConnection::new("http://demo:8080/");
        let fetch = tokio::spawn(async move { fetch_server_properties(&connection, TIMEOUT).await });

        server.next_get().await.unwrap().fail(401);
        let err = assert_err!(fetch.await.unwrap());
        assert_eq!(err.status_code, 401);
        assert_eq!(err.url, "http://demo:8080/rest");
    }

    #[tokio::test]
    async fn test_fetch_rejects_unexpected_root() {
        let (connection, mut server) = FakeConnection::new("http://demo:8080/");
        let fetch = tokio::spawn(async move { fetch_server_properties(&connection, TIMEOUT).await });

        server.next_get().await.unwrap().respond("<html>captive portal</html>");
        let err = assert_err!(fetch.await.unwrap());
        assert_eq!(err.status_code, 200);
    }
}
