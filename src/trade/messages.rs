//! Trade protocol wire format
//!
//! JSON envelopes on the app-to-app channel, discriminated by `type`.
//! Anything on the channel that does not parse as one of these is another
//! protocol's traffic and is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{AssetInstance, Member};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequester {
    pub asset_trail_instance_id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TradeMessage {
    #[serde(rename = "private-asset-instance-request", rename_all = "camelCase")]
    Request {
        trade_id: Uuid,
        asset_instance_id: Uuid,
        requester: TradeRequester,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    #[serde(rename = "private-asset-instance-response", rename_all = "camelCase")]
    Response {
        trade_id: Uuid,
        asset_instance_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rejection: Option<String>,
    },

    #[serde(
        rename = "private-asset-instance-authorization-request",
        rename_all = "camelCase"
    )]
    AuthorizationRequest {
        authorization_id: Uuid,
        asset_instance: AssetInstance,
        requester: Member,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    #[serde(
        rename = "private-asset-instance-authorization-response",
        rename_all = "camelCase"
    )]
    AuthorizationResponse {
        authorization_id: Uuid,
        authorized: bool,
    },

    #[serde(rename = "private-asset-instance-push", rename_all = "camelCase")]
    Push {
        asset_instance_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let msg = TradeMessage::Request {
            trade_id: Uuid::new_v4(),
            asset_instance_id: Uuid::new_v4(),
            requester: TradeRequester {
                asset_trail_instance_id: "node1".to_string(),
                address: "0x12345".to_string(),
            },
            metadata: None,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "private-asset-instance-request");
        assert!(v["tradeId"].is_string());
        assert_eq!(v["requester"]["assetTrailInstanceId"], "node1");
        assert!(v.get("metadata").is_none());
    }

    #[test]
    fn test_response_round_trip() {
        let v = json!({
            "type": "private-asset-instance-response",
            "tradeId": Uuid::new_v4().to_string(),
            "assetInstanceId": Uuid::new_v4().to_string(),
            "rejection": "not authorized",
        });
        let msg: TradeMessage = serde_json::from_value(v).unwrap();
        match msg {
            TradeMessage::Response {
                rejection, content, ..
            } => {
                assert_eq!(rejection.as_deref(), Some("not authorized"));
                assert!(content.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_does_not_parse() {
        let v = json!({"type": "some-other-protocol", "x": 1});
        assert!(serde_json::from_value::<TradeMessage>(v).is_err());
    }
}
