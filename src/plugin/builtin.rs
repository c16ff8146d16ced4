//! Built-in reference pair: a visit counter service and the badge that shows it.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::context::{ClientContext, ServiceContext};
use super::definition::{
    ClientPlugin, Endpoint, Lifecycle, Plugin, PluginDefinition, PluginResponse, ScheduledTask, ServicePlugin,
};
use super::error::PluginError;
use super::mount::{escape_html, MountTarget};
use super::types::{PluginId, PluginMeta};

pub const VISIT_COUNTER_ID: &str = "platform/visit-counter";
pub const VISIT_BADGE_ID: &str = "platform/visit-badge";

pub const TOTAL_KEY: &str = "visits:total";
const DEFAULT_SNAPSHOT_KEY: &str = "visits:snapshot";
const DEFAULT_LABEL: &str = "Visits";

fn config_str<'a>(config: &'a Value, key: &str, default: &'a str) -> &'a str {
    config.get(key).and_then(Value::as_str).unwrap_or(default)
}

async fn current_total(ctx: &ServiceContext) -> anyhow::Result<u64> {
    Ok(ctx.storage.get_as::<u64>(TOTAL_KEY).await?.unwrap_or(0))
}

pub struct VisitCounter {
    definition: PluginDefinition,
}

impl VisitCounter {
    pub fn new() -> Result<Self, PluginError> {
        Ok(Self {
            definition: PluginDefinition::new(
                PluginId::parse(VISIT_COUNTER_ID)?,
                PluginMeta::new("Visit counter", env!("CARGO_PKG_VERSION"))
                    .description("Counts visits and periodically snapshots the total"),
                json!({
                    "enabled": true,
                    "snapshot_key": DEFAULT_SNAPSHOT_KEY,
                    "label": DEFAULT_LABEL,
                }),
            ),
        })
    }
}

#[async_trait]
impl Lifecycle<ServiceContext> for VisitCounter {
    async fn start(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        ctx.logger.info(&format!("counting visits (enabled: {})", ctx.enabled()));
        Ok(())
    }
}

impl ServicePlugin for VisitCounter {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    fn tasks(&self) -> Vec<ScheduledTask> {
        vec![ScheduledTask::new("rollup", "*/5 * * * *", |ctx: ServiceContext| async move {
            let total = current_total(&ctx).await?;
            let key = config_str(&ctx.config, "snapshot_key", DEFAULT_SNAPSHOT_KEY).to_string();
            ctx.storage.set_as(&key, &json!({ "total": total, "at": Utc::now() })).await?;
            ctx.logger.child("rollup").debug(&format!("{} = {}", key, total));
            Ok(())
        })]
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        vec![
            Endpoint::get("/count", |ctx: ServiceContext, _req| async move {
                let total = current_total(&ctx).await?;
                let label = config_str(&ctx.config, "label", DEFAULT_LABEL);
                Ok(PluginResponse::ok(json!({ "total": total, "label": label })))
            }),
            // get then set: concurrent hits may be lost, storage has no cross-call atomicity
            Endpoint::post("/hit", |ctx: ServiceContext, _req| async move {
                let total = current_total(&ctx).await? + 1;
                ctx.storage.set_as(TOTAL_KEY, &total).await?;
                Ok(PluginResponse::ok(json!({ "total": total })))
            }),
        ]
    }
}

pub struct VisitBadge {
    definition: PluginDefinition,
}

impl VisitBadge {
    pub fn new() -> Result<Self, PluginError> {
        Ok(Self {
            definition: PluginDefinition::new(
                PluginId::parse(VISIT_BADGE_ID)?,
                PluginMeta::new("Visit badge", env!("CARGO_PKG_VERSION")),
                json!({
                    "enabled": true,
                    "label": DEFAULT_LABEL,
                    "theme": "light",
                }),
            ),
        })
    }
}

impl Lifecycle<ClientContext> for VisitBadge {}

#[async_trait]
impl ClientPlugin for VisitBadge {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn render(&self, ctx: &ClientContext, target: &mut MountTarget) -> anyhow::Result<()> {
        if !ctx.enabled() {
            return Ok(());
        }
        let label = config_str(&ctx.config, "label", DEFAULT_LABEL);
        let theme = config_str(&ctx.config, "theme", "light");
        let source = ctx
            .service(VISIT_COUNTER_ID)
            .map(|s| format!("{}/count", s.base_path))
            .unwrap_or_default();

        target.set_inner_html(format!(
            r#"<span class="visit-badge visit-badge--{}" data-source="{}">{}</span>"#,
            escape_html(theme),
            escape_html(&source),
            escape_html(label)
        ));
        target.set_attribute("data-plugin", ctx.id.as_str());
        ctx.publish("badge.rendered", json!({ "target": target.id() }));
        Ok(())
    }

    async fn destroy(&self, _ctx: &ClientContext, target: &mut MountTarget) -> anyhow::Result<()> {
        target.set_inner_html("");
        target.remove_attribute("data-plugin");
        Ok(())
    }
}

pub fn reference_pair() -> Result<Vec<Plugin>, PluginError> {
    Ok(vec![Plugin::service(VisitCounter::new()?), Plugin::client(VisitBadge::new()?)])
}
