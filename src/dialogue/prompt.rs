//! Prompt 模板与渲染
//!
//! 模板里的 `{name}` 占位符按上下文单遍替换；决策模板要求模型只输出一个 JSON 对象。

use super::context::ConversationContext;
use super::decision::Decision;
use super::persona::Speaker;
use crate::store::Persona;

/// 决策 prompt：选下一位发言者、话题动作与 1~3 条指导
pub const DECISION_TEMPLATE: &str = r#"你是一场旅行对话的导演。对话双方：
- 数字分身「{avatar_name}」：{avatar_description}
- 旅行伙伴「{partner_name}」：{partner_description}

旅行信息：目的地 {destination}，{days} 天，偏好：{preference}
当前话题：{current_topic}
已讨论过的话题：
{topic_history}

最近的对话：
{history}

请决定下一句由谁来说，以及话题如何推进。规则：
1. 没有当前话题时使用 INIT_AND_GENERATE，并在 new_topic 中给出首个话题；
2. 当前话题仍有可聊内容时使用 CONTINUE_TOPIC，topic 填当前话题；
3. 当前话题已聊透时使用 END_AND_GENERATE，并给出一个没讨论过的新话题；
4. 尽量让双方交替发言，guidance_list 给 1~3 条简短指导。

只输出如下 JSON，不要输出其他内容：
{
  "turn_action": "SPEAK_AVATAR 或 SPEAK_PARTNER",
  "topic_action": "INIT_AND_GENERATE / CONTINUE_TOPIC / END_AND_GENERATE",
  "topic_args": {
    "topic": "当前话题或 null",
    "new_topic": {"title": "新话题标题", "rationale": "选择理由", "confidence": 0.8}
  },
  "guidance_list": ["指导1", "指导2"],
  "confidence": 0.8,
  "rationale": "决策理由"
}"#;

/// 数字分身台词 prompt
pub const AVATAR_SPEAK_TEMPLATE: &str = r#"你是用户的数字分身「{me_name}」，性格与背景：{me_description}
你正和旅行伙伴「{other_name}」一起计划去 {destination} 的 {days} 天旅行，用户偏好：{preference}
当前话题：{current_topic}

最近的对话：
{history}

本轮发言指导：
{guidance}

请以用户本人的口吻说一句自然、口语化的话（不超过 80 字），表达自己的想法或疑问。
输出 JSON：{"text": "你的台词"}"#;

/// 旅行伙伴台词 prompt
pub const PARTNER_SPEAK_TEMPLATE: &str = r#"你是旅行伙伴「{me_name}」，性格与背景：{me_description}
你正陪「{other_name}」计划去 {destination} 的 {days} 天旅行，对方偏好：{preference}
当前话题：{current_topic}

最近的对话：
{history}

本轮发言指导：
{guidance}

请以伙伴的身份回应一句（不超过 80 字），给出具体建议或经验，语气轻松友好。
输出 JSON：{"text": "你的台词"}"#;

/// 单遍替换：只认 `vars` 中的 `{name}`，其余花括号原样保留，替换进去的值不再扫描
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let value = after.find('}').and_then(|end| {
            let name = &after[..end];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, end))
        });
        match value {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn render_decision(ctx: &ConversationContext, history_count: usize) -> String {
    let days = ctx.travel_days().to_string();
    let topic_history = ctx.topic_history_summary();
    let history = ctx.render_history(history_count);
    fill(
        DECISION_TEMPLATE,
        &[
            ("avatar_name", ctx.avatar_name()),
            ("avatar_description", ctx.avatar_description()),
            ("partner_name", ctx.partner_name()),
            ("partner_description", ctx.partner_description()),
            ("destination", ctx.destination_text()),
            ("days", &days),
            ("preference", ctx.preference_text()),
            ("current_topic", ctx.current_topic_text()),
            ("topic_history", &topic_history),
            ("history", &history),
        ],
    )
}

/// 台词 prompt；话题取决策里本轮要讲的话题（新话题优先）
pub fn render_speak(
    template: &str,
    ctx: &ConversationContext,
    decision: &Decision,
    me: &Persona,
    other: Speaker,
    history_count: usize,
) -> String {
    let other_name = match other {
        Speaker::Avatar => ctx.avatar_name(),
        Speaker::Partner => ctx.partner_name(),
    };
    let topic = decision
        .speaking_topic()
        .unwrap_or_else(|| ctx.current_topic_text());
    let guidance = decision
        .guidance_list
        .iter()
        .enumerate()
        .map(|(i, g)| format!("{}. {}", i + 1, g))
        .collect::<Vec<_>>()
        .join("\n");

    let days = ctx.travel_days().to_string();
    let history = ctx.render_history(history_count);
    fill(
        template,
        &[
            ("me_name", &me.name),
            ("me_description", me.description.as_deref().unwrap_or("暂无描述")),
            ("other_name", other_name),
            ("destination", ctx.destination_text()),
            ("days", &days),
            ("preference", ctx.preference_text()),
            ("current_topic", topic),
            ("history", &history),
            ("guidance", &guidance),
        ],
    )
}
