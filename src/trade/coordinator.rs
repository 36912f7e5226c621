//! Asset trade coordinator
//!
//! Requester side: `coordinate_asset_trade` sends a trade request to the
//! asset's author and waits for the channel response (and, for file-backed
//! assets, the document transfer) before reporting success. Author side:
//! `process_private_asset_instance_request` validates the requester against
//! the member directory, runs the human authorization hop, and answers
//! unconditionally, with `rejection` carrying any failure. Pushed content
//! for instances not yet observed locally parks in the pending table.
//!
//! Listeners on the shared channel are broadcast subscriptions filtered by
//! `trade_id` / `authorization_id` / expected path; dropping the receiver
//! removes the listener on success and timeout paths alike.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{IdentityConfig, TradeConfig};
use crate::error::{NodeError, Result};
use crate::hash;
use crate::plugins::{AppChannel, ChannelMessage, PeerExchange, TransferEvent};
use crate::store::Store;
use crate::types::{AssetDefinition, AssetInstance, Member};

use super::messages::{TradeMessage, TradeRequester};
use super::pending::{PendingDeliveries, PendingPrivateDelivery};

/// Deterministic document-exchange path for an instance's file content.
pub fn document_path(asset_instance_id: Uuid) -> String {
    format!("asset-instances/{asset_instance_id}")
}

pub struct TradeCoordinator {
    store: Arc<dyn Store>,
    channel: Arc<dyn AppChannel>,
    exchange: Arc<dyn PeerExchange>,
    identity: IdentityConfig,
    config: TradeConfig,
    pending: PendingDeliveries,
}

impl TradeCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        channel: Arc<dyn AppChannel>,
        exchange: Arc<dyn PeerExchange>,
        identity: IdentityConfig,
        config: TradeConfig,
    ) -> Self {
        Self {
            store,
            channel,
            exchange,
            identity,
            config,
            pending: PendingDeliveries::new(),
        }
    }

    pub fn pending_deliveries(&self) -> &PendingDeliveries {
        &self.pending
    }

    /// Entry point for inbound channel traffic. Non-trade messages and the
    /// response envelopes consumed by waiting listeners pass through
    /// untouched.
    pub async fn handle_channel_message(&self, msg: ChannelMessage) -> Result<()> {
        let Ok(trade_msg) = serde_json::from_value::<TradeMessage>(msg.body.clone()) else {
            return Ok(());
        };
        match trade_msg {
            TradeMessage::Request {
                trade_id,
                asset_instance_id,
                requester,
                ..
            } => {
                self.process_private_asset_instance_request(
                    &msg.from,
                    trade_id,
                    asset_instance_id,
                    &requester,
                )
                .await
            }
            TradeMessage::Push {
                asset_instance_id,
                content,
                filename,
            } => {
                self.process_private_asset_instance_push(
                    &msg.from,
                    asset_instance_id,
                    content,
                    filename,
                )
                .await
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Requester side
    // ------------------------------------------------------------------

    /// Fetch the private content of an asset instance from its author.
    ///
    /// Resolves only after the trade response has been verified and
    /// persisted and, for file-backed assets, the document transfer has
    /// landed.
    pub async fn coordinate_asset_trade(
        &self,
        asset_instance_id: Uuid,
        metadata: Option<Value>,
    ) -> Result<()> {
        let instance = self
            .store
            .retrieve_asset_instance_by_id(asset_instance_id)
            .await?
            .ok_or_else(|| {
                NodeError::Validation(format!("unknown asset instance {asset_instance_id}"))
            })?;
        let definition = self
            .store
            .retrieve_asset_definition_by_id(instance.asset_definition_id)
            .await?
            .ok_or_else(|| {
                NodeError::Validation(format!(
                    "unknown asset definition {}",
                    instance.asset_definition_id
                ))
            })?;
        let author = self
            .store
            .retrieve_member_by_address(&instance.author)
            .await?
            .ok_or_else(|| {
                NodeError::Validation(format!("unknown author member {}", instance.author))
            })?;

        let trade_id = Uuid::new_v4();
        info!(trade = %trade_id, instance = %asset_instance_id, author = %author.identity,
            "Starting private asset trade");

        // Both listeners install before the request leaves, so neither
        // response can slip past.
        let doc_rx = definition
            .content_schema
            .is_none()
            .then(|| self.exchange.subscribe_transfers());
        let chan_rx = self.channel.subscribe();

        let request = TradeMessage::Request {
            trade_id,
            asset_instance_id,
            requester: TradeRequester {
                asset_trail_instance_id: self.identity.asset_trail_instance_id.clone(),
                address: self.identity.address.clone(),
            },
            metadata,
        };
        self.channel
            .dispatch_message(&author.app_destination, serde_json::to_value(&request)?)
            .await?;

        tokio::try_join!(
            self.await_trade_response(chan_rx, trade_id, &instance, &definition),
            self.await_document(doc_rx, document_path(asset_instance_id)),
        )?;

        info!(trade = %trade_id, instance = %asset_instance_id, "Private asset trade settled");
        Ok(())
    }

    async fn await_trade_response(
        &self,
        mut rx: broadcast::Receiver<ChannelMessage>,
        trade_id: Uuid,
        instance: &AssetInstance,
        definition: &AssetDefinition,
    ) -> Result<()> {
        let deadline = Duration::from_secs(self.config.trade_timeout_secs);
        let (content, filename, rejection) = tokio::time::timeout(deadline, async {
            loop {
                let msg = match rx.recv().await {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(NodeError::AppChannel("channel closed".to_string()))
                    }
                };
                let Ok(TradeMessage::Response {
                    trade_id: id,
                    content,
                    filename,
                    rejection,
                    ..
                }) = serde_json::from_value(msg.body)
                else {
                    continue;
                };
                if id != trade_id {
                    continue;
                }
                return Ok((content, filename, rejection));
            }
        })
        .await
        .map_err(|_| NodeError::TradeTimeout)??;

        if let Some(rejection) = rejection {
            return Err(NodeError::TradeRejected(rejection));
        }

        if let Some(content) = &content {
            let actual = hash::content_hash(content)?;
            if !hash::hashes_equal(&actual, &instance.content_hash) {
                return Err(NodeError::HashMismatch {
                    expected: instance.content_hash.clone(),
                    actual,
                });
            }
            if let Some(schema) = &definition.content_schema {
                validate_against_schema(schema, content)?;
            }
        }

        self.store
            .set_asset_instance_private_content(instance.id, content, filename)
            .await
    }

    async fn await_document(
        &self,
        rx: Option<broadcast::Receiver<TransferEvent>>,
        expected_path: String,
    ) -> Result<()> {
        let Some(mut rx) = rx else { return Ok(()) };
        let deadline = Duration::from_secs(self.config.document_transfer_timeout_secs);
        tokio::time::timeout(deadline, async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.path == expected_path => {
                        debug!(path = %event.path, from = %event.from, "Document transfer landed");
                        return Ok(());
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(NodeError::PeerExchange(
                            "transfer stream closed".to_string(),
                        ))
                    }
                }
            }
        })
        .await
        .map_err(|_| NodeError::DocumentTransferTimeout)?
    }

    // ------------------------------------------------------------------
    // Author side
    // ------------------------------------------------------------------

    /// Handle a trade request for an asset this node authored. The response
    /// envelope goes back to the requester in every case; a failure rides
    /// in its `rejection` field.
    pub async fn process_private_asset_instance_request(
        &self,
        from: &str,
        trade_id: Uuid,
        asset_instance_id: Uuid,
        requester: &TradeRequester,
    ) -> Result<()> {
        let outcome = self.author_trade(from, asset_instance_id, requester).await;

        let response = match &outcome {
            Ok((content, filename)) => TradeMessage::Response {
                trade_id,
                asset_instance_id,
                content: content.clone(),
                filename: filename.clone(),
                rejection: None,
            },
            Err(e) => {
                warn!(trade = %trade_id, instance = %asset_instance_id, error = %e,
                    "Rejecting asset trade");
                TradeMessage::Response {
                    trade_id,
                    asset_instance_id,
                    content: None,
                    filename: None,
                    rejection: Some(e.to_string()),
                }
            }
        };

        // Response dispatch is unconditional.
        self.channel
            .dispatch_message(from, serde_json::to_value(&response)?)
            .await?;

        outcome.map(|_| ())
    }

    async fn author_trade(
        &self,
        from: &str,
        asset_instance_id: Uuid,
        requester: &TradeRequester,
    ) -> Result<(Option<Value>, Option<String>)> {
        let member = self
            .store
            .retrieve_member_by_address(&requester.address)
            .await?
            .ok_or_else(|| {
                NodeError::TradeRejected(format!("unknown requester {}", requester.address))
            })?;
        if member.asset_trail_instance_id != requester.asset_trail_instance_id {
            return Err(NodeError::TradeRejected(
                "requester asset trail instance mismatch".to_string(),
            ));
        }
        if member.app_destination != from {
            return Err(NodeError::TradeRejected(
                "requester destination mismatch".to_string(),
            ));
        }

        let instance = self
            .store
            .retrieve_asset_instance_by_id(asset_instance_id)
            .await?
            .ok_or_else(|| {
                NodeError::TradeRejected(format!("unknown asset instance {asset_instance_id}"))
            })?;
        if instance.author != self.identity.address {
            return Err(NodeError::TradeRejected(
                "asset instance not authored by this node".to_string(),
            ));
        }
        let definition = self
            .store
            .retrieve_asset_definition_by_id(instance.asset_definition_id)
            .await?
            .ok_or_else(|| {
                NodeError::TradeRejected(format!(
                    "unknown asset definition {}",
                    instance.asset_definition_id
                ))
            })?;
        if !definition.is_content_private {
            return Err(NodeError::TradeRejected(
                "asset content is not private".to_string(),
            ));
        }

        self.request_authorization(&instance, &member).await?;

        if definition.content_schema.is_some() {
            // Structured content travels inline in the response.
            Ok((instance.content.clone(), None))
        } else {
            // File content goes out of band; the response carries only the
            // filename.
            self.exchange
                .transfer_document(
                    &member.doc_exchange_destination,
                    &document_path(instance.id),
                )
                .await?;
            Ok((None, instance.filename.clone()))
        }
    }

    /// Ask the operator client whether this delivery may proceed. Only an
    /// authorization response from the configured client destination with
    /// our authorization id counts; everything else on the channel is
    /// ignored until the deadline.
    async fn request_authorization(
        &self,
        instance: &AssetInstance,
        requester: &Member,
    ) -> Result<()> {
        let authorization_id = Uuid::new_v4();
        let mut rx = self.channel.subscribe();

        let request = TradeMessage::AuthorizationRequest {
            authorization_id,
            asset_instance: instance.clone(),
            requester: requester.clone(),
            metadata: None,
        };
        self.channel
            .dispatch_message(
                &self.identity.client_destination,
                serde_json::to_value(&request)?,
            )
            .await?;
        debug!(authorization = %authorization_id, instance = %instance.id,
            "Awaiting trade authorization");

        let deadline = Duration::from_secs(self.config.authorization_timeout_secs);
        let authorized = tokio::time::timeout(deadline, async {
            loop {
                let msg = match rx.recv().await {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(NodeError::AppChannel("channel closed".to_string()))
                    }
                };
                if msg.from != self.identity.client_destination {
                    continue;
                }
                let Ok(TradeMessage::AuthorizationResponse {
                    authorization_id: id,
                    authorized,
                }) = serde_json::from_value(msg.body)
                else {
                    continue;
                };
                if id != authorization_id {
                    continue;
                }
                return Ok(authorized);
            }
        })
        .await
        .map_err(|_| NodeError::AuthorizationTimeout)??;

        if !authorized {
            return Err(NodeError::TradeRejected(
                "content delivery not authorized".to_string(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Push path
    // ------------------------------------------------------------------

    /// Content pushed by an author ahead of any request. If the instance
    /// row is not yet known locally the push parks until it appears.
    pub async fn process_private_asset_instance_push(
        &self,
        from: &str,
        asset_instance_id: Uuid,
        content: Option<Value>,
        filename: Option<String>,
    ) -> Result<()> {
        let Some(instance) = self
            .store
            .retrieve_asset_instance_by_id(asset_instance_id)
            .await?
        else {
            self.pending.park(
                asset_instance_id,
                PendingPrivateDelivery {
                    content,
                    filename,
                    from_destination: from.to_string(),
                },
            );
            return Ok(());
        };

        self.accept_delivery(&instance, from, content, filename)
            .await
    }

    /// Called when an asset-instance row is first observed locally; drains
    /// any delivery parked for it.
    pub async fn asset_instance_created(&self, instance: &AssetInstance) -> Result<()> {
        let Some(delivery) = self.pending.take(instance.id) else {
            return Ok(());
        };
        debug!(instance = %instance.id, "Draining parked private delivery");
        self.accept_delivery(
            instance,
            &delivery.from_destination,
            delivery.content,
            delivery.filename,
        )
        .await
    }

    async fn accept_delivery(
        &self,
        instance: &AssetInstance,
        from: &str,
        content: Option<Value>,
        filename: Option<String>,
    ) -> Result<()> {
        let author = self
            .store
            .retrieve_member_by_address(&instance.author)
            .await?
            .ok_or_else(|| {
                NodeError::TradeRejected(format!("unknown author member {}", instance.author))
            })?;
        if author.app_destination != from {
            return Err(NodeError::TradeRejected(
                "push origin does not match author destination".to_string(),
            ));
        }

        if let Some(content) = &content {
            let actual = hash::content_hash(content)?;
            if !hash::hashes_equal(&actual, &instance.content_hash) {
                return Err(NodeError::HashMismatch {
                    expected: instance.content_hash.clone(),
                    actual,
                });
            }
        }

        self.store
            .set_asset_instance_private_content(instance.id, content, filename)
            .await?;
        info!(instance = %instance.id, "Private content persisted");
        Ok(())
    }
}

fn validate_against_schema(schema: &Value, content: &Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| NodeError::SchemaValidation(format!("invalid content schema: {e}")))?;
    if let Some(error) = validator.iter_errors(content).next() {
        return Err(NodeError::SchemaValidation(error.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use serde_json::json;
    use std::sync::Mutex;

    use crate::store::MemoryStore;

    // A loopback channel fabric: one endpoint per destination, traffic
    // routed by destination string, `from` stamped by the sender.
    #[derive(Default)]
    struct ChannelFabric {
        endpoints: DashMap<String, broadcast::Sender<ChannelMessage>>,
    }

    impl ChannelFabric {
        fn endpoint(self: &Arc<Self>, local: &str) -> Arc<FabricEndpoint> {
            self.endpoints
                .entry(local.to_string())
                .or_insert_with(|| broadcast::channel(32).0);
            Arc::new(FabricEndpoint {
                fabric: Arc::clone(self),
                local: local.to_string(),
            })
        }
    }

    struct FabricEndpoint {
        fabric: Arc<ChannelFabric>,
        local: String,
    }

    #[async_trait]
    impl AppChannel for FabricEndpoint {
        fn name(&self) -> &str {
            "ut_channel"
        }
        async fn dispatch_message(&self, destination: &str, body: Value) -> Result<()> {
            let sender = self
                .fabric
                .endpoints
                .entry(destination.to_string())
                .or_insert_with(|| broadcast::channel(32).0)
                .clone();
            let _ = sender.send(ChannelMessage {
                from: self.local.clone(),
                body,
            });
            Ok(())
        }
        fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
            self.fabric
                .endpoints
                .entry(self.local.clone())
                .or_insert_with(|| broadcast::channel(32).0)
                .subscribe()
        }
    }

    struct FabricExchange {
        transfers: broadcast::Sender<TransferEvent>,
        documents: Mutex<Vec<(String, String)>>,
    }

    impl FabricExchange {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                transfers: broadcast::channel(8).0,
                documents: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PeerExchange for FabricExchange {
        fn name(&self) -> &str {
            "ut_dx"
        }
        async fn send_message(&self, _peer: &str, _payload: Vec<u8>) -> Result<String> {
            Ok("tracking1".to_string())
        }
        async fn transfer_blob(&self, _peer: &str, _path: &str) -> Result<String> {
            Ok("tracking1".to_string())
        }
        async fn transfer_document(&self, destination: &str, path: &str) -> Result<()> {
            self.documents
                .lock()
                .unwrap()
                .push((destination.to_string(), path.to_string()));
            // Delivery is observed by the receiving side as a completed
            // inbound transfer.
            let _ = self.transfers.send(TransferEvent {
                from: destination.to_string(),
                path: path.to_string(),
            });
            Ok(())
        }
        async fn get_endpoint_info(&self) -> Result<Value> {
            Ok(json!({"peer": "ut_local"}))
        }
        fn subscribe_transfers(&self) -> broadcast::Receiver<TransferEvent> {
            self.transfers.subscribe()
        }
    }

    struct TradeFixture {
        fabric: Arc<ChannelFabric>,
        requester: TradeCoordinator,
        author: Arc<TradeCoordinator>,
        requester_store: Arc<MemoryStore>,
        exchange: Arc<FabricExchange>,
        instance: AssetInstance,
    }

    const AUTHOR_DEST: &str = "author-app";
    const REQUESTER_DEST: &str = "requester-app";
    const CLIENT_DEST: &str = "author-client";

    fn identity(address: &str, instance_id: &str, app: &str) -> IdentityConfig {
        IdentityConfig {
            org_identity: address.to_string(),
            address: address.to_string(),
            asset_trail_instance_id: instance_id.to_string(),
            client_destination: CLIENT_DEST.to_string(),
            doc_exchange_destination: format!("{app}-docs"),
        }
    }

    fn author_member() -> Member {
        Member {
            identity: "org-author".to_string(),
            address: "0xauthor".to_string(),
            asset_trail_instance_id: "author-instance".to_string(),
            app_destination: AUTHOR_DEST.to_string(),
            doc_exchange_destination: "author-app-docs".to_string(),
        }
    }

    fn requester_member() -> Member {
        Member {
            identity: "org-requester".to_string(),
            address: "0xrequester".to_string(),
            asset_trail_instance_id: "requester-instance".to_string(),
            app_destination: REQUESTER_DEST.to_string(),
            doc_exchange_destination: "requester-app-docs".to_string(),
        }
    }

    /// Build requester and author coordinators wired through one fabric,
    /// with the asset known on both sides.
    fn fixture(with_schema: bool, content: Value) -> TradeFixture {
        let fabric = Arc::new(ChannelFabric::default());
        let exchange = FabricExchange::new();

        let definition = AssetDefinition {
            id: Uuid::new_v4(),
            author: "0xauthor".to_string(),
            is_content_private: true,
            content_schema: with_schema.then(|| {
                json!({
                    "type": "object",
                    "properties": {"serial": {"type": "string"}},
                    "required": ["serial"],
                })
            }),
            content_schema_hash: None,
        };
        let instance = AssetInstance {
            id: Uuid::new_v4(),
            asset_definition_id: definition.id,
            author: "0xauthor".to_string(),
            content_hash: hash::content_hash(&content).unwrap(),
            content: Some(content),
            filename: Some("asset.bin".to_string()),
        };

        let requester_store = Arc::new(MemoryStore::new());
        requester_store.add_member(author_member());
        requester_store.add_member(requester_member());
        requester_store.add_asset_definition(definition.clone());
        let mut remote_view = instance.clone();
        remote_view.content = None;
        requester_store.add_asset_instance(remote_view);

        let author_store = Arc::new(MemoryStore::new());
        author_store.add_member(author_member());
        author_store.add_member(requester_member());
        author_store.add_asset_definition(definition);
        author_store.add_asset_instance(instance.clone());

        let trade_config = TradeConfig {
            trade_timeout_secs: 2,
            authorization_timeout_secs: 2,
            document_transfer_timeout_secs: 2,
        };

        let requester = TradeCoordinator::new(
            requester_store.clone(),
            fabric.endpoint(REQUESTER_DEST),
            exchange.clone(),
            identity("0xrequester", "requester-instance", "requester-app"),
            trade_config.clone(),
        );
        let author = Arc::new(TradeCoordinator::new(
            author_store,
            fabric.endpoint(AUTHOR_DEST),
            exchange.clone(),
            identity("0xauthor", "author-instance", "author-app"),
            trade_config,
        ));

        // Author node: feed inbound channel traffic into the coordinator.
        let author_rx = fabric.endpoint(AUTHOR_DEST).subscribe();
        let author_task = Arc::clone(&author);
        tokio::spawn(async move {
            let mut rx = author_rx;
            while let Ok(msg) = rx.recv().await {
                let _ = author_task.handle_channel_message(msg).await;
            }
        });

        TradeFixture {
            fabric,
            requester,
            author,
            requester_store,
            exchange,
            instance,
        }
    }

    /// Operator client that answers every authorization request.
    fn spawn_authorizer(fabric: &Arc<ChannelFabric>, authorized: bool) {
        let endpoint = fabric.endpoint(CLIENT_DEST);
        let mut rx = endpoint.subscribe();
        tokio::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if let Ok(TradeMessage::AuthorizationRequest {
                    authorization_id, ..
                }) = serde_json::from_value(msg.body)
                {
                    let response = TradeMessage::AuthorizationResponse {
                        authorization_id,
                        authorized,
                    };
                    let _ = endpoint
                        .dispatch_message(AUTHOR_DEST, serde_json::to_value(&response).unwrap())
                        .await;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_trade_happy_path_with_schema() {
        let content = json!({"serial": "A123"});
        let fixture = fixture(true, content.clone());
        spawn_authorizer(&fixture.fabric, true);

        fixture
            .requester
            .coordinate_asset_trade(fixture.instance.id, None)
            .await
            .unwrap();

        // Content verified, validated and persisted locally.
        let stored = fixture
            .requester_store
            .retrieve_asset_instance_by_id(fixture.instance.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, Some(content));

        // Inline delivery: no document transfer was initiated.
        assert!(fixture.exchange.documents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trade_file_path_uses_document_exchange() {
        let content = json!({"serial": "A123"});
        let fixture = fixture(false, content);
        spawn_authorizer(&fixture.fabric, true);

        fixture
            .requester
            .coordinate_asset_trade(fixture.instance.id, None)
            .await
            .unwrap();

        // Filename persisted; the file itself went over document exchange
        // to the requester's destination.
        let stored = fixture
            .requester_store
            .retrieve_asset_instance_by_id(fixture.instance.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.filename.as_deref(), Some("asset.bin"));

        let documents = fixture.exchange.documents.lock().unwrap();
        assert_eq!(
            documents[0],
            (
                "requester-app-docs".to_string(),
                document_path(fixture.instance.id)
            )
        );
    }

    #[tokio::test]
    async fn test_unauthorized_trade_is_rejected() {
        let fixture = fixture(true, json!({"serial": "A123"}));
        spawn_authorizer(&fixture.fabric, false);

        let err = fixture
            .requester
            .coordinate_asset_trade(fixture.instance.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::TradeRejected(_)));
    }

    #[tokio::test]
    async fn test_push_before_instance_parks_then_drains() {
        let content = json!({"serial": "A123"});
        let store = Arc::new(MemoryStore::new());
        store.add_member(author_member());
        let fabric = Arc::new(ChannelFabric::default());
        let coordinator = TradeCoordinator::new(
            store.clone(),
            fabric.endpoint(REQUESTER_DEST),
            FabricExchange::new(),
            identity("0xrequester", "requester-instance", "requester-app"),
            TradeConfig::default(),
        );

        let instance = AssetInstance {
            id: Uuid::new_v4(),
            asset_definition_id: Uuid::new_v4(),
            author: "0xauthor".to_string(),
            content_hash: hash::content_hash(&content).unwrap(),
            content: None,
            filename: None,
        };

        // Push arrives first: parked, nothing persisted.
        coordinator
            .process_private_asset_instance_push(
                AUTHOR_DEST,
                instance.id,
                Some(content.clone()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(coordinator.pending_deliveries().len(), 1);

        // The instance row appears: the parked delivery drains.
        store.add_asset_instance(instance.clone());
        coordinator.asset_instance_created(&instance).await.unwrap();
        assert!(coordinator.pending_deliveries().is_empty());
        let stored = store
            .retrieve_asset_instance_by_id(instance.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, Some(content));
    }

    #[tokio::test]
    async fn test_push_with_wrong_hash_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.add_member(author_member());
        let instance = AssetInstance {
            id: Uuid::new_v4(),
            asset_definition_id: Uuid::new_v4(),
            author: "0xauthor".to_string(),
            content_hash: hash::content_hash(&json!({"serial": "A123"})).unwrap(),
            content: None,
            filename: None,
        };
        store.add_asset_instance(instance.clone());

        let fabric = Arc::new(ChannelFabric::default());
        let coordinator = TradeCoordinator::new(
            store,
            fabric.endpoint(REQUESTER_DEST),
            FabricExchange::new(),
            identity("0xrequester", "requester-instance", "requester-app"),
            TradeConfig::default(),
        );

        let err = coordinator
            .process_private_asset_instance_push(
                AUTHOR_DEST,
                instance.id,
                Some(json!({"serial": "TAMPERED"})),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn test_request_from_wrong_destination_is_rejected() {
        let fixture = fixture(true, json!({"serial": "A123"}));

        let err = fixture
            .author
            .process_private_asset_instance_request(
                "somewhere-else",
                Uuid::new_v4(),
                fixture.instance.id,
                &TradeRequester {
                    asset_trail_instance_id: "requester-instance".to_string(),
                    address: "0xrequester".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::TradeRejected(_)));
    }
}
