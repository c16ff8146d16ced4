use std::sync::Arc;

use admin_api_rust::plugin::builtin::{VisitBadge, VisitCounter, VISIT_BADGE_ID, VISIT_COUNTER_ID};
use admin_api_rust::plugin::{
    LifecycleState, MemoryStorage, MountTarget, Plugin, PluginError, PluginHost, PluginId, PluginRequest, SkipReason,
    TaskOutcome,
};
use anyhow::Result;
use axum::http::Method;
use serde_json::{json, Value};

fn counter_id() -> PluginId {
    PluginId::parse(VISIT_COUNTER_ID).expect("valid id")
}

fn badge_id() -> PluginId {
    PluginId::parse(VISIT_BADGE_ID).expect("valid id")
}

async fn host_with(counter: Option<Value>, badge: Option<Value>) -> Result<(PluginHost, Arc<MemoryStorage>)> {
    let storage = Arc::new(MemoryStorage::new());
    let host = PluginHost::new(storage.clone());
    host.register_with(Plugin::service(VisitCounter::new()?), counter).await?;
    host.register_with(Plugin::client(VisitBadge::new()?), badge).await?;
    for (id, result) in host.start_all().await {
        result.map_err(|e| anyhow::anyhow!("{} failed to start: {}", id, e))?;
    }
    Ok((host, storage))
}

#[tokio::test]
async fn empty_overrides_resolve_to_defaults() -> Result<()> {
    let (host, _) = host_with(Some(json!({})), None).await?;

    assert_eq!(
        host.config(&counter_id()).await?,
        json!({"enabled": true, "snapshot_key": "visits:snapshot", "label": "Visits"})
    );
    assert_eq!(host.config(&badge_id()).await?, json!({"enabled": true, "label": "Visits", "theme": "light"}));
    Ok(())
}

#[tokio::test]
async fn overrides_replace_only_named_keys() -> Result<()> {
    let (host, _) = host_with(Some(json!({"label": "Hits"})), Some(json!({"theme": "dark"}))).await?;

    let counter = host.config(&counter_id()).await?;
    assert_eq!(counter["label"], json!("Hits"));
    assert_eq!(counter["snapshot_key"], json!("visits:snapshot"));

    let mut target = MountTarget::new("nav");
    host.render(&badge_id(), &mut target).await?;
    assert!(target.inner_html().contains("visit-badge--dark"));
    Ok(())
}

#[tokio::test]
async fn render_destroy_render_is_idempotent() -> Result<()> {
    let (host, _) = host_with(None, None).await?;
    let mut target = MountTarget::new("header");

    host.render(&badge_id(), &mut target).await?;
    let first = target.inner_html().to_string();
    assert!(!first.is_empty());

    host.destroy(&badge_id(), &mut target).await?;
    assert!(target.is_empty());
    assert_eq!(target.attribute("data-plugin"), None);

    host.render(&badge_id(), &mut target).await?;
    assert_eq!(target.inner_html(), first);
    Ok(())
}

#[tokio::test]
async fn render_publishes_on_the_bridge() -> Result<()> {
    let (host, _) = host_with(None, None).await?;
    let mut bridge = host.subscribe_bridge();
    let mut target = MountTarget::new("sidebar");

    host.render(&badge_id(), &mut target).await?;
    let event = bridge.recv().await?;
    assert_eq!(event.source, badge_id());
    assert_eq!(event.topic, "badge.rendered");
    assert_eq!(event.payload, json!({"target": "sidebar"}));
    Ok(())
}

#[tokio::test]
async fn disabled_plugins_have_no_side_effects() -> Result<()> {
    let off = Some(json!({"enabled": false}));
    let (host, storage) = host_with(off.clone(), off).await?;

    // Disabled is orthogonal to lifecycle: both plugins still reach ACTIVE
    assert_eq!(host.state(&counter_id()).await?, LifecycleState::Active);
    assert_eq!(host.state(&badge_id()).await?, LifecycleState::Active);

    let outcome = host.run_task(&counter_id(), "rollup").await?;
    assert_eq!(outcome, TaskOutcome::Skipped { reason: SkipReason::Disabled });
    assert_eq!(storage.writes(), 0);

    let err = host
        .dispatch(&counter_id(), PluginRequest::new(Method::POST, "/hit"))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Disabled(_)));
    assert_eq!(storage.writes(), 0);

    let mut target = MountTarget::new("header");
    host.render(&badge_id(), &mut target).await?;
    assert!(target.is_empty());
    Ok(())
}

#[tokio::test]
async fn disabling_clears_previously_rendered_output() -> Result<()> {
    let (host, _) = host_with(None, None).await?;
    let mut target = MountTarget::new("header");

    host.render(&badge_id(), &mut target).await?;
    assert!(!target.is_empty());

    host.reload(&badge_id(), Some(json!({"enabled": false}))).await?;
    host.render(&badge_id(), &mut target).await?;
    assert!(target.is_empty());
    assert_eq!(target.attribute("data-plugin"), None);

    host.reload(&badge_id(), Some(json!({"enabled": true}))).await?;
    host.render(&badge_id(), &mut target).await?;
    assert!(target.inner_html().contains("visit-badge"));
    Ok(())
}

#[tokio::test]
async fn reload_applies_new_config_to_handlers() -> Result<()> {
    let (host, _) = host_with(None, None).await?;

    let config = host.reload(&counter_id(), Some(json!({"label": "Hits"}))).await?;
    assert_eq!(config["label"], json!("Hits"));
    assert_eq!(host.state(&counter_id()).await?, LifecycleState::Active);

    let response = host.dispatch(&counter_id(), PluginRequest::new(Method::GET, "/count")).await?;
    assert_eq!(response.body, json!({"total": 0, "label": "Hits"}));
    Ok(())
}

#[tokio::test]
async fn stopped_plugins_refuse_work_until_restarted() -> Result<()> {
    let (host, storage) = host_with(None, None).await?;

    host.stop(&counter_id()).await?;
    assert_eq!(host.state(&counter_id()).await?, LifecycleState::Ready);
    assert_eq!(
        host.run_task(&counter_id(), "rollup").await?,
        TaskOutcome::Skipped { reason: SkipReason::NotActive }
    );
    let err = host
        .dispatch(&counter_id(), PluginRequest::new(Method::GET, "/count"))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::NotActive { .. }));

    host.start(&counter_id()).await?;
    assert_eq!(host.run_task(&counter_id(), "rollup").await?, TaskOutcome::Completed);
    assert_eq!(storage.writes(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_returns_every_plugin_to_unloaded() -> Result<()> {
    let (host, _) = host_with(None, None).await?;

    for (id, result) in host.shutdown_all().await {
        assert!(result.is_ok(), "{} failed to shut down", id);
    }
    assert_eq!(host.state(&counter_id()).await?, LifecycleState::Unloaded);
    assert_eq!(host.state(&badge_id()).await?, LifecycleState::Unloaded);
    Ok(())
}

#[tokio::test]
async fn runtime_mismatches_are_rejected() -> Result<()> {
    let (host, _) = host_with(None, None).await?;

    let err = host.run_task(&badge_id(), "rollup").await.unwrap_err();
    assert!(matches!(err, PluginError::WrongRuntime { .. }));

    let mut target = MountTarget::new("header");
    let err = host.render(&counter_id(), &mut target).await.unwrap_err();
    assert!(matches!(err, PluginError::WrongRuntime { .. }));
    Ok(())
}
