//! Async client for tokio callers.
//!
//! Wraps a shared [`Connection`] and moves each blocking exchange onto the
//! tokio blocking pool. Clones share the connection, so queries from any
//! clone are still serialized.

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::ipc::connection::Connection;
use crate::ipc::locator::{EndpointLocator, WindowLocator};
use crate::ipc::protocol::{SearchRequest, SearchResponse, ServiceVersion};
use crate::ipc::transport::{Transport, WindowTransport};
use crate::{QixError, Result};

/// IPC client for sending search requests to the indexing service.
pub struct IpcClient<L = WindowLocator, T = WindowTransport> {
    connection: Arc<Connection<L, T>>,
    /// Query defaults for [`IpcClient::search`]
    config: ClientConfig,
}

impl IpcClient {
    /// Client for the default service endpoint.
    ///
    /// The endpoint is not looked up until the first request.
    ///
    /// # Errors
    /// Returns `Transport` if the reply window cannot be created.
    pub fn new() -> Result<Self> {
        Self::from_config(&ClientConfig::default())
    }

    /// Client for the endpoint, timeouts and output fields named in `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        // Reject unknown field names now rather than on the first search
        config.fields()?;
        let connection = Connection::new(config.locator(), WindowTransport::new()?)
            .with_command_timeout(config.timeout());
        Ok(Self::with_connection(Arc::new(connection)).with_config(config.clone()))
    }
}

impl<L, T> IpcClient<L, T>
where
    L: EndpointLocator + 'static,
    T: Transport + 'static,
{
    /// Client over an existing connection, with default query settings.
    pub fn with_connection(connection: Arc<Connection<L, T>>) -> Self {
        Self {
            connection,
            config: ClientConfig::default(),
        }
    }

    /// Use the query timeout and output fields of `config` for searches.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connection(&self) -> &Arc<Connection<L, T>> {
        &self.connection
    }

    /// Search for files matching the query.
    ///
    /// # Arguments
    /// * `query` - Search text in the service's query syntax
    /// * `limit` - Maximum number of results to return
    ///
    /// # Errors
    /// Any error from [`Connection::query`], or `InvalidArgument` for a
    /// request that cannot be built.
    pub async fn search(&self, query: &str, limit: u32) -> Result<SearchResponse> {
        self.search_with_offset(query, limit, 0).await
    }

    /// Search for files with pagination offset.
    ///
    /// # Arguments
    /// * `query` - Search text in the service's query syntax
    /// * `limit` - Maximum number of results to return
    /// * `offset` - Number of results to skip (for pagination)
    ///
    /// Timeout and output fields come from the client's [`ClientConfig`].
    pub async fn search_with_offset(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<SearchResponse> {
        let request = self
            .config
            .request_builder(query)?
            .max_count(limit)
            .offset(offset)
            .build()?;
        self.query(request).await
    }

    /// Run a fully specified request.
    pub async fn query(&self, request: SearchRequest) -> Result<SearchResponse> {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || connection.query(&request))
            .await
            .map_err(|e| QixError::Transport(format!("Query worker failed: {}", e)))?
    }

    /// Version of the running service.
    pub async fn version(&self) -> Result<ServiceVersion> {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || connection.version())
            .await
            .map_err(|e| QixError::Transport(format!("Version worker failed: {}", e)))?
    }

    /// Whether the service has finished loading its database.
    pub async fn is_database_loaded(&self) -> Result<bool> {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || connection.is_database_loaded())
            .await
            .map_err(|e| QixError::Transport(format!("Status worker failed: {}", e)))?
    }

    /// Check if the indexing service can be located right now.
    pub fn is_service_available(&self) -> bool {
        self.connection.is_service_available()
    }
}

impl<L, T> Clone for IpcClient<L, T> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::ipc::codec::ReplyItem;
    use crate::ipc::mock::{MockReply, MockService};
    use crate::ipc::protocol::ResultFields;

    fn mock_client(names: &[&str]) -> (MockService, IpcClient<MockService, MockService>) {
        let service = MockService::with_files(names);
        let connection = Connection::new(service.clone(), service.clone());
        (service, IpcClient::with_connection(Arc::new(connection)))
    }

    #[tokio::test]
    async fn test_search_with_offset() {
        let (_service, client) = mock_client(&["one", "two", "three"]);
        let response = client.search_with_offset("*", 2, 1).await.unwrap();

        let names: Vec<_> = response.records.iter().filter_map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["two", "three"]);
        assert_eq!(response.total_matches, 3);
    }

    #[tokio::test]
    async fn test_invalid_limit_rejected_before_wire() {
        let (service, client) = mock_client(&["one"]);
        let err = client.search("*", 0).await.unwrap_err();

        assert!(matches!(err, QixError::InvalidArgument(_)));
        assert!(service.events().is_empty());
    }

    #[tokio::test]
    async fn test_service_not_available_when_not_running() {
        let (service, client) = mock_client(&[]);
        service.unregister();
        assert!(!client.is_service_available());
    }

    #[tokio::test]
    async fn test_search_uses_configured_timeout_and_fields() {
        let (service, client) = mock_client(&["slow.txt"]);
        let mut config = ClientConfig::default();
        config.query.timeout_ms = 30;
        config.query.fields = vec!["name".to_string(), "size".to_string()];
        let client = client.with_config(config);

        service.set_handler(|_| {
            MockReply::Delay(
                Duration::from_millis(200),
                Box::new(MockReply::Items { total: 0, items: Vec::new() }),
            )
        });
        let err = client.search("*", 5).await.unwrap_err();
        assert!(matches!(err, QixError::Timeout(d) if d == Duration::from_millis(30)));

        service.set_handler(|frame| MockReply::Items {
            total: 1,
            items: vec![ReplyItem::file("C:\\", frame.text.clone())],
        });
        let response = client.search("fast", 5).await.unwrap();
        assert_eq!(response.echoed.fields, ResultFields::NAME | ResultFields::SIZE);
        assert_eq!(response.records[0].name.as_deref(), Some("fast"));
        assert_eq!(response.records[0].path, None);
    }

    #[tokio::test]
    async fn test_clone_keeps_config() {
        let (_service, client) = mock_client(&["a"]);
        let mut config = ClientConfig::default();
        config.query.fields = vec!["name".to_string()];
        let other = client.with_config(config).clone();

        let response = other.search("*", 1).await.unwrap();
        assert_eq!(response.echoed.fields, ResultFields::NAME);
    }

    #[test]
    fn test_window_client_off_windows() {
        // Only Windows has a window-message transport
        #[cfg(not(windows))]
        assert!(matches!(IpcClient::new(), Err(QixError::Transport(_))));
    }
}
