use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sippin::media_core::{RtpMap, SdpMedia};
use sippin::prelude::*;

/// Signaling layer that accepts everything
struct Loopback;

#[async_trait]
impl SignalingLayer for Loopback {
    async fn call(&self, _target: &str, _offer: Option<&str>) -> ClientResult<DialogId> {
        Ok(DialogId::new())
    }
    async fn ring(&self, _dialog: DialogId) -> ClientResult<()> {
        Ok(())
    }
    async fn accept(&self, _dialog: DialogId, _answer: &str) -> ClientResult<()> {
        Ok(())
    }
    async fn refuse(&self, _dialog: DialogId) -> ClientResult<()> {
        Ok(())
    }
    async fn redirect(&self, _dialog: DialogId, _target: &str) -> ClientResult<()> {
        Ok(())
    }
    async fn ack_with_answer(&self, _dialog: DialogId, _answer: &str) -> ClientResult<()> {
        Ok(())
    }
    async fn hangup(&self, _dialog: DialogId) -> ClientResult<()> {
        Ok(())
    }
    async fn modify(&self, _dialog: DialogId, _body: &str) -> ClientResult<()> {
        Ok(())
    }
    async fn transfer(&self, _dialog: DialogId, _target: &str) -> ClientResult<()> {
        Ok(())
    }
    async fn accept_transfer(&self, _dialog: DialogId) -> ClientResult<()> {
        Ok(())
    }
    async fn notify(&self, _dialog: DialogId, _code: u16, _reason: &str) -> ClientResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_call_through_prelude() {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        let profile = UserAgentProfile::new("alice");
        let agent = UserAgent::new(profile, Arc::new(Loopback), Arc::new(CodecCatalog::standard())).unwrap();

        let dialog = agent.call("sip:bob@example.com").await.unwrap();
        assert_eq!(agent.state().await, CallState::OutgoingProgress);

        let answer = SessionDescription::new("bob", "127.0.0.1".parse().unwrap())
            .with_media(SdpMedia::new("audio", 0, "RTP/AVP", vec!["8".to_string()]).with_rtpmap(RtpMap::new(8, "PCMA", 8000)));
        agent
            .handle_event(SignalingEvent::Accepted {
                dialog,
                sdp: Some(answer.to_string()),
            })
            .await;
        assert_eq!(agent.state().await, CallState::Active);

        agent.hangup().await.unwrap();
        assert_eq!(agent.state().await, CallState::Idle);
    })
    .await;

    assert!(result.is_ok(), "Test timed out");
}

#[test]
fn test_version_exported() {
    assert!(!sippin::VERSION.is_empty());
    assert!(sippin::DESCRIPTION.contains("SIP"));
}
