//! Notification mail templates with Handlebars
//!
//! Five bodies serve the six notification consumers: the moved notice
//! reuses the review template with its own variables. Every render merges
//! three layers: static app globals, runtime globals (`app.year`,
//! `today`), and the caller's data, with the caller winning on conflict.

use chrono::Local;
use eyre::{eyre, Result};
use handlebars::Handlebars;
use serde_json::{json, Value};

const HITOKOTO_APPENDED: &str = r#"<h2>您好，{{username}}。</h2>
<p>您于 {{created_at}} 提交的句子： <b>{{hitokoto}}</b> —— {{from_who}} 「{{from}}」（分类：{{type}}）， 已经进入审核队列了。</p>
<p>我们会尽快处理您的句子。当审核结果出来时，我们将会通过邮件通知您。</p>
<br />
<p>感谢您的支持，<br />
萌创团队 - 一言项目组<br />
{{today}}</p>"#;

// Shared by the review and the moved notices; each fills only its own
// conditional block.
const HITOKOTO_REVIEWED: &str = r#"<h2>您好，{{username}}。</h2>
<p>您于 {{created_at}} 提交的句子： <b>{{hitokoto}}</b> —— {{from_who}} 「{{from}}」（分类：{{type}}）， 已经审核完成。</p>
{{#if review_result}}
<p>审核结果为：<strong>{{review_result}}</strong>，审核员 {{reviewer}} ({{reviewer_uid}}) 于 {{reviewed_at}} 操作审核。</p>
{{/if}}
{{#if operate}}
<p>本次为管理员重新审核，结果为：<strong>{{operate}}</strong>，操作员 {{operator_username}} ({{operator_uid}}) 于 {{operated_at}} 操作。</p>
{{/if}}
<p>如果您对审核结果有疑问，可以发信至 <code>i@loli.online</code> 联系我们（备注句子 UUID）。</p>
<br />
<p>感谢您的支持，<br />
萌创团队 - 一言项目组<br />
{{today}}</p>"#;

const POLL_CREATED: &str = r#"<h2>您好，{{username}}。</h2>
<p>新的投票菌已于 {{created_at}} 出现，投票编号 #{{poll_id}}：</p>
<p><b>{{hitokoto}}</b> —— {{from_who}} 「{{from}}」</p>
<p>分类:{{type}}，提交者：{{creator}}。</p>
<p>请您前往 <a href="{{app.url}}">{{app.name}}</a> 审核中心参与投票。</p>
<br />
<p>感谢您的支持，<br />
萌创团队 - 一言项目组<br />
{{today}}</p>"#;

const POLL_FINISHED: &str = r#"<h2>您好，{{username}}。</h2>
<p>您参与的投票 #{{poll_id}} 已于 {{operated_at}} 结束。</p>
<p><b>{{hitokoto}}</b> —— {{from_who}} 「{{from}}」</p>
<p>分类：{{type}}，提交者：{{creator}}。</p>
<p>投票结果：<strong>{{status}}</strong>。您的投票是 {{method}}（{{point}} 票）。</p>
<br />
<p>感谢您的支持，<br />
萌创团队 - 一言项目组<br />
{{now}}</p>"#;

const POLL_DAILY_REPORT: &str = r#"<h2>您好，{{username}}。</h2>
<p>这是 {{created_at}} 为您生成的审核日报。</p>
<h3>平台信息（过去 24 小时）</h3>
<ul>
  <li>剩余投票：{{system.total}} 个</li>
  <li>已处理投票：{{system.processed}} 个（入库 {{system.approved}} 个，驳回 {{system.rejected}} 个，亟待修改 {{system.need_modify}} 个）</li>
</ul>
<h3>您的信息（过去 24 小时）</h3>
<ul>
  <li>参与投票：{{user.polled.total}} 个（赞同 {{user.polled.approve}} 个，驳回 {{user.polled.reject}} 个，亟待修改 {{user.polled.need_modify}} 个）</li>
  <li>已入库：{{user.approved}} 个，已驳回：{{user.rejected}} 个，亟待修改：{{user.need_modify}} 个</li>
  <li>等待其他审核员投票：{{user.waiting_for_others}} 个，等待您投票：{{user.wait_for_polling}} 个</li>
</ul>
<br />
<p>感谢您的支持，<br />
萌创团队 - 一言项目组<br />
{{today}}</p>"#;

/// Handlebars-based template engine
///
/// Supports:
/// - Variables: `{{name}}` (HTML-escaped)
/// - Conditionals: `{{#if condition}}...{{/if}}`
/// - Dotted paths: `{{system.total}}`
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    /// Create a new TemplateEngine with the notification templates
    pub fn new() -> Result<Self> {
        let mut engine = Self {
            handlebars: Handlebars::new(),
        };

        engine.register("hitokoto_appended", HITOKOTO_APPENDED)?;
        engine.register("hitokoto_reviewed", HITOKOTO_REVIEWED)?;
        engine.register("poll_created", POLL_CREATED)?;
        engine.register("poll_finished", POLL_FINISHED)?;
        engine.register("poll_daily_report", POLL_DAILY_REPORT)?;

        Ok(engine)
    }

    /// Register a template
    pub fn register(&mut self, name: &str, source: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, source)
            .map_err(|e| eyre!("Failed to register template '{name}': {e}"))
    }

    /// Check if a template exists
    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.get_templates().contains_key(name)
    }

    /// List all registered templates
    pub fn list_templates(&self) -> Vec<&str> {
        self.handlebars
            .get_templates()
            .keys()
            .map(|s| s.as_str())
            .collect()
    }

    /// Render a template by name into an HTML body. Subjects are the
    /// caller's business.
    pub fn render(&self, name: &str, data: &Value) -> Result<String> {
        if !self.has_template(name) {
            return Err(eyre!("Template not found: {name}"));
        }

        let mut ctx = base_globals();
        merge_values(&mut ctx, &runtime_globals());
        merge_values(&mut ctx, data);

        self.handlebars
            .render(name, &ctx)
            .map_err(|e| eyre!("Failed to render template '{name}': {e}"))
    }
}

fn base_globals() -> Value {
    json!({
        "app": {
            "name": "一言",
            "url": "https://hitokoto.cn",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

// Re-evaluated on every render; dates move.
fn runtime_globals() -> Value {
    let now = Local::now();
    json!({
        "app": {
            "year": now.format("%Y").to_string(),
        },
        "today": now.format("%Y 年 %-m 月 %-d 日").to_string(),
    })
}

/// Recursive merge: objects merge key-wise, anything else in `src`
/// replaces the value in `dst`.
fn merge_values(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (key, src_value) in src_map {
                match dst_map.get_mut(key) {
                    Some(dst_value) => merge_values(dst_value, src_value),
                    None => {
                        dst_map.insert(key.clone(), src_value.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_registers_notification_templates() {
        let engine = TemplateEngine::new().unwrap();
        for name in [
            "hitokoto_appended",
            "hitokoto_reviewed",
            "poll_created",
            "poll_finished",
            "poll_daily_report",
        ] {
            assert!(engine.has_template(name), "missing template {name}");
        }
    }

    #[test]
    fn test_render_appended() {
        let engine = TemplateEngine::new().unwrap();

        let data = json!({
            "username": "月云端",
            "created_at": "2023-10-03 15:39:55",
            "hitokoto": "人生没有白走的路，每一步都算数。",
            "from": "演讲",
            "from_who": "李宗盛",
            "type": "Internet - 来自网络",
        });

        let html = engine.render("hitokoto_appended", &data).unwrap();
        assert!(html.contains("月云端"));
        assert!(html.contains("已经进入审核队列"));
        assert!(html.contains("Internet - 来自网络"));
        // Runtime global lands in the footer
        assert!(html.contains("月") && html.contains("日"));
    }

    #[test]
    fn test_caller_data_wins_over_globals() {
        let engine = TemplateEngine::new().unwrap();

        let data = json!({
            "username": "tester",
            "today": "2020 年 1 月 1 日",
        });

        let html = engine.render("hitokoto_appended", &data).unwrap();
        assert!(html.contains("2020 年 1 月 1 日"));
    }

    #[test]
    fn test_review_template_serves_both_notices() {
        let engine = TemplateEngine::new().unwrap();

        let reviewed = json!({
            "username": "tester",
            "review_result": "入库",
            "reviewer": "審核員",
            "reviewer_uid": 42,
            "reviewed_at": "2023-10-03 16:00:00",
        });
        let html = engine.render("hitokoto_reviewed", &reviewed).unwrap();
        assert!(html.contains("审核结果为"));
        assert!(!html.contains("重新审核"));

        let moved = json!({
            "username": "tester",
            "operate": "通过",
            "operator_username": "管理員",
            "operator_uid": 1,
            "operated_at": "2023-10-03 16:00:00",
        });
        let html = engine.render("hitokoto_reviewed", &moved).unwrap();
        assert!(html.contains("重新审核"));
        assert!(!html.contains("审核结果为"));
    }

    #[test]
    fn test_daily_report_renders_nested_counts() {
        let engine = TemplateEngine::new().unwrap();

        let data = json!({
            "username": "tester",
            "created_at": "2023-10-03 08:00:00",
            "system": {
                "total": 120, "processed": 30, "approved": 20,
                "rejected": 8, "need_modify": 2,
            },
            "user": {
                "polled": { "total": 15, "approve": 10, "reject": 4, "need_modify": 1 },
                "wait_for_polling": 105,
                "waiting_for_others": 5,
                "approved": 9,
                "rejected": 3,
                "need_modify": 1,
            },
        });

        let html = engine.render("poll_daily_report", &data).unwrap();
        assert!(html.contains("剩余投票：120 个"));
        assert!(html.contains("赞同 10 个"));
        assert!(html.contains("等待您投票：105 个"));
    }

    #[test]
    fn test_missing_template_errors() {
        let engine = TemplateEngine::new().unwrap();
        let err = engine.render("nonexistent", &json!({})).unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_poll_created_links_the_app() {
        let engine = TemplateEngine::new().unwrap();
        let html = engine
            .render("poll_created", &json!({ "username": "tester", "poll_id": 7 }))
            .unwrap();
        assert!(html.contains("#7"));
        assert!(html.contains("https://hitokoto.cn"));
    }
}
