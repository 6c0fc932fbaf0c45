//! Primary and companion sharing one HTTP backend over a companion link

use std::sync::Arc;
use std::time::Duration;

use sosync_core::{
    CompanionLink, CoordinatorBuilder, CoordinatorConfig, CoordinatorHandle, DeviceOrigin,
    Operation, SessionEvent, SessionSnapshot, SessionState,
};
use sosync_integration_tests::TestBackend;

async fn wait(
    handle: &CoordinatorHandle,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(10), handle.wait_for(predicate))
        .await
        .expect("Timed out waiting for coordinator")
        .expect("Coordinator stopped")
}

async fn start_devices(
    backend: &TestBackend,
) -> anyhow::Result<(CoordinatorHandle, CoordinatorHandle, CompanionLink)> {
    let (phone_link, watch_link) = CompanionLink::pair();

    let mut phone_config = CoordinatorConfig::new().with_identity(42, "phone-1");
    phone_config.countdown_interval_ms = 50;
    let phone = CoordinatorBuilder::new()
        .config(phone_config)
        .service(Arc::new(backend.client()?))
        .companion_link(phone_link.clone())
        .build()
        .await?;

    let watch = CoordinatorBuilder::new()
        .config(
            CoordinatorConfig::new()
                .with_identity(42, "watch-1")
                .with_device_origin(DeviceOrigin::Companion),
        )
        .service(Arc::new(backend.client()?))
        .companion_link(watch_link)
        .build()
        .await?;

    Ok((phone, watch, phone_link))
}

#[tokio::test]
async fn test_watch_activation_reaches_phone() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let (phone, watch, phone_link) = start_devices(&backend).await?;
    let mut phone_events = phone.subscribe_events();

    watch.activate_immediately();
    let active = wait(&watch, |s| {
        s.state == SessionState::Active && s.session_id().is_some() && !s.is_processing_request
    })
    .await;
    let id = active.session_id().unwrap();

    let mirrored = wait(&phone, |s| {
        s.state == SessionState::Active && s.session_id() == Some(id)
    })
    .await;
    assert_eq!(mirrored.session.unwrap().device_id, "watch-1");
    assert!(phone_link.delivered() >= 1);

    // The phone adopted the session without creating its own
    assert_eq!(backend.service.call_count(Operation::Create), 1);

    let mut saw_companion_change = false;
    while let Ok(event) = phone_events.try_recv() {
        if let SessionEvent::StateChanged { current, source, .. } = event {
            if current == SessionState::Active {
                saw_companion_change = source == sosync_core::ChangeSource::Companion;
            }
        }
    }
    assert!(saw_companion_change);

    phone.complete_recovery();
    wait(&watch, |s| s.state == SessionState::Inactive && s.session.is_none()).await;
    wait(&phone, |s| s.state == SessionState::Inactive && !s.is_processing_request).await;
    assert_eq!(backend.service.record(id).unwrap().state, SessionState::Inactive);

    phone.shutdown().await?;
    watch.shutdown().await?;
    backend.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_phone_countdown_mirrors_on_watch() -> anyhow::Result<()> {
    let backend = TestBackend::start().await?;
    let (phone, watch, _) = start_devices(&backend).await?;

    phone.initiate();
    let id = wait(&phone, |s| {
        s.state == SessionState::Active && s.session_id().is_some() && !s.is_processing_request
    })
    .await
    .session_id()
    .unwrap();

    let mirrored = wait(&watch, |s| {
        s.state == SessionState::Active && s.session_id() == Some(id)
    })
    .await;
    assert!(mirrored.session.unwrap().activation_time.is_some());
    // Only the phone activated
    assert_eq!(backend.service.call_count(Operation::Activate), 1);

    phone.begin_recovery();
    wait(&watch, |s| s.state == SessionState::Recovering).await;

    watch.complete_recovery();
    wait(&phone, |s| s.state == SessionState::Inactive && s.session.is_none()).await;
    wait(&watch, |s| s.state == SessionState::Inactive && !s.is_processing_request).await;

    phone.shutdown().await?;
    watch.shutdown().await?;
    backend.shutdown().await;
    Ok(())
}
