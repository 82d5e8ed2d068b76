//! Thought 决策解析与校验
//!
//! LLM 的原始输出 → 类型化、满足约束的 Decision，或唯一一个 DecisionError；没有部分成功。
//! 纯函数，不做 I/O，可以脱离真实模型单独测试。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// guidance_list 最多保留的条数（多出的截断，不拒绝）
pub const MAX_GUIDANCE: usize = 3;
/// 每条 guidance 的最少字符数
pub const MIN_GUIDANCE_CHARS: usize = 2;

const TURN_ACTIONS: &str = "SPEAK_AVATAR, SPEAK_PARTNER";
const TOPIC_ACTIONS: &str = "INIT_AND_GENERATE, CONTINUE_TOPIC, END_AND_GENERATE";

/// 决策解析 / 校验失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecisionError {
    #[error("decision is not valid JSON: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {value:?}. Allowed: {allowed}")]
    UnknownAction {
        field: &'static str,
        value: String,
        allowed: &'static str,
    },

    #[error("guidance_list must contain at least 1 entry")]
    EmptyGuidance,

    #[error("guidance_list[{index}] is too short: {text:?}")]
    GuidanceTooShort { index: usize, text: String },

    #[error("CONTINUE_TOPIC requires non-empty topic_args.topic")]
    MissingTopic,

    #[error("END_AND_GENERATE requires topic_args.new_topic with a title")]
    MissingNewTopic,
}

/// 下一位发言者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnAction {
    #[serde(rename = "SPEAK_AVATAR")]
    SpeakAvatar,
    #[serde(rename = "SPEAK_PARTNER")]
    SpeakPartner,
}

impl TurnAction {
    fn from_wire(value: &str) -> Option<Self> {
        match value.trim() {
            "SPEAK_AVATAR" | "SPEAK_USER_DIGITAL_AVATAR" | "SPEAK_USER_AVATAR" => {
                Some(TurnAction::SpeakAvatar)
            }
            "SPEAK_PARTNER" | "SPEAK_TRAVEL_PARTNER" => Some(TurnAction::SpeakPartner),
            _ => None,
        }
    }
}

/// 话题处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopicAction {
    /// 首次无话题：生成第一个
    InitAndGenerate,
    ContinueTopic,
    /// 收尾当前话题并生成新话题
    EndAndGenerate,
}

impl TopicAction {
    fn from_wire(value: &str) -> Option<Self> {
        match value.trim() {
            "INIT_AND_GENERATE" => Some(TopicAction::InitAndGenerate),
            "CONTINUE_TOPIC" => Some(TopicAction::ContinueTopic),
            "END_AND_GENERATE" => Some(TopicAction::EndAndGenerate),
            _ => None,
        }
    }
}

/// 新话题描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTopic {
    pub title: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopicArgs {
    pub topic: Option<String>,
    pub new_topic: Option<NewTopic>,
}

/// 校验通过的决策
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub turn_action: TurnAction,
    pub guidance_list: Vec<String>,
    pub topic_action: TopicAction,
    pub topic_args: TopicArgs,
    pub confidence: f64,
    pub rationale: Option<String>,
}

impl Decision {
    /// 本轮要新建的话题：END 必有；INIT 带了 new_topic 时也算
    pub fn opened_topic(&self) -> Option<&NewTopic> {
        match self.topic_action {
            TopicAction::ContinueTopic => None,
            TopicAction::InitAndGenerate | TopicAction::EndAndGenerate => {
                self.topic_args.new_topic.as_ref()
            }
        }
    }

    /// 发言时围绕的话题标题
    pub fn speaking_topic(&self) -> Option<&str> {
        self.opened_topic()
            .map(|t| t.title.as_str())
            .or(self.topic_args.topic.as_deref())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct RawDecision {
    #[serde(default)]
    turn_action: Option<String>,
    #[serde(default)]
    guidance_list: Option<Vec<String>>,
    #[serde(default)]
    topic_action: Option<String>,
    #[serde(default)]
    topic_args: Option<RawTopicArgs>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawTopicArgs {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    new_topic: Option<RawNewTopic>,
}

#[derive(Deserialize)]
struct RawNewTopic {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// 从模型输出中取出 JSON 对象（```json 代码块或首个 { 到末个 }）
fn extract_json(raw: &str) -> Result<&str, DecisionError> {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Ok(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&trimmed[start..=end]),
        _ => Err(DecisionError::Parse(format!("no JSON object in: {trimmed}"))),
    }
}

/// "null"、空串、纯空白都视为缺省
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| {
        let v = v.trim();
        !v.is_empty() && v != "null"
    })
}

/// 解析并校验模型输出
///
/// 检查顺序：JSON → turn_action → topic_action → guidance_list → 话题参数，只返回第一个错误。
pub fn parse_decision(raw: &str) -> Result<Decision, DecisionError> {
    let json = extract_json(raw)?;
    let parsed: RawDecision =
        serde_json::from_str(json).map_err(|e| DecisionError::Parse(e.to_string()))?;

    let turn_value = parsed.turn_action.unwrap_or_default();
    let turn_action =
        TurnAction::from_wire(&turn_value).ok_or(DecisionError::UnknownAction {
            field: "turn_action",
            value: turn_value,
            allowed: TURN_ACTIONS,
        })?;

    let topic_value = parsed.topic_action.unwrap_or_default();
    let topic_action =
        TopicAction::from_wire(&topic_value).ok_or(DecisionError::UnknownAction {
            field: "topic_action",
            value: topic_value,
            allowed: TOPIC_ACTIONS,
        })?;

    let mut guidance_list = parsed.guidance_list.unwrap_or_default();
    if guidance_list.is_empty() {
        return Err(DecisionError::EmptyGuidance);
    }
    for (index, text) in guidance_list.iter().enumerate() {
        if text.trim().chars().count() < MIN_GUIDANCE_CHARS {
            return Err(DecisionError::GuidanceTooShort {
                index,
                text: text.clone(),
            });
        }
    }
    if guidance_list.len() > MAX_GUIDANCE {
        tracing::warn!(
            count = guidance_list.len(),
            "guidance_list longer than {}, truncating",
            MAX_GUIDANCE
        );
        guidance_list.truncate(MAX_GUIDANCE);
    }

    let raw_args = parsed.topic_args.unwrap_or_default();
    let topic_args = TopicArgs {
        topic: non_blank(raw_args.topic),
        new_topic: raw_args.new_topic.and_then(|t| {
            non_blank(t.title).map(|title| NewTopic {
                title,
                rationale: t.rationale.unwrap_or_default(),
                confidence: t.confidence.unwrap_or(0.0),
            })
        }),
    };

    match topic_action {
        TopicAction::ContinueTopic if topic_args.topic.is_none() => {
            return Err(DecisionError::MissingTopic)
        }
        TopicAction::EndAndGenerate if topic_args.new_topic.is_none() => {
            return Err(DecisionError::MissingNewTopic)
        }
        _ => {}
    }

    Ok(Decision {
        turn_action,
        guidance_list,
        topic_action,
        topic_args,
        confidence: parsed.confidence.unwrap_or(0.0),
        rationale: non_blank(parsed.rationale),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continue_without_topic_rejected() {
        let raw = r#"{"turn_action":"SPEAK_AVATAR","topic_action":"CONTINUE_TOPIC","guidance_list":["推进主题"],"topic_args":{"topic":null}}"#;
        assert_eq!(parse_decision(raw), Err(DecisionError::MissingTopic));

        let raw = r#"{"turn_action":"SPEAK_AVATAR","topic_action":"CONTINUE_TOPIC","guidance_list":["推进主题"],"topic_args":{"topic":"null"}}"#;
        assert_eq!(parse_decision(raw), Err(DecisionError::MissingTopic));
    }

    #[test]
    fn test_check_order_actions_then_guidance_then_topic() {
        // 缺 guidance_list 先于话题规则报错
        let raw = r#"{"turn_action":"SPEAK_AVATAR","topic_action":"CONTINUE_TOPIC","topic_args":{"topic":null}}"#;
        assert_eq!(parse_decision(raw), Err(DecisionError::EmptyGuidance));

        // 缺 turn_action 最先报错
        let raw = r#"{"topic_action":"END_AND_GENERATE","topic_args":{}}"#;
        assert!(matches!(
            parse_decision(raw),
            Err(DecisionError::UnknownAction { field: "turn_action", ref value, .. }) if value.is_empty()
        ));

        // 动作与指导都合法时才轮到话题规则
        let raw = r#"{"turn_action":"SPEAK_AVATAR","topic_action":"END_AND_GENERATE","guidance_list":["换话题"],"topic_args":{}}"#;
        assert_eq!(parse_decision(raw), Err(DecisionError::MissingNewTopic));
    }

    #[test]
    fn test_end_without_new_topic_rejected() {
        let raw = r#"{"turn_action":"SPEAK_PARTNER","topic_action":"END_AND_GENERATE","guidance_list":["换个话题"],"topic_args":{}}"#;
        assert_eq!(parse_decision(raw), Err(DecisionError::MissingNewTopic));

        let raw = r#"{"turn_action":"SPEAK_PARTNER","topic_action":"END_AND_GENERATE","guidance_list":["换个话题"],"topic_args":{"new_topic":{"title":"  "}}}"#;
        assert_eq!(parse_decision(raw), Err(DecisionError::MissingNewTopic));
    }

    #[test]
    fn test_valid_decision_round_trips() {
        let raw = r#"{
            "turn_action": "SPEAK_PARTNER",
            "guidance_list": ["提出一个具体时间", "推进主题"],
            "topic_action": "END_AND_GENERATE",
            "topic_args": {"topic": "为什么去京都", "new_topic": {"title": "首日路线与到达时间", "rationale": "动机已聊透", "confidence": 0.8}},
            "confidence": 0.75,
            "rationale": "伙伴更了解交通"
        }"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.turn_action, TurnAction::SpeakPartner);
        assert_eq!(decision.topic_action, TopicAction::EndAndGenerate);
        assert_eq!(decision.guidance_list, vec!["提出一个具体时间", "推进主题"]);
        assert_eq!(decision.topic_args.topic.as_deref(), Some("为什么去京都"));
        let new_topic = decision.topic_args.new_topic.as_ref().unwrap();
        assert_eq!(new_topic.title, "首日路线与到达时间");
        assert_eq!(new_topic.rationale, "动机已聊透");
        assert_eq!(new_topic.confidence, 0.8);
        assert_eq!(decision.confidence, 0.75);
        assert_eq!(decision.rationale.as_deref(), Some("伙伴更了解交通"));

        let again = parse_decision(&decision.to_json()).unwrap();
        assert_eq!(again, decision);
    }

    #[test]
    fn test_unknown_action_names_allowed_set() {
        let raw = r#"{"turn_action":"SPEAK_GUIDE","topic_action":"CONTINUE_TOPIC","guidance_list":["推进"],"topic_args":{"topic":"美食"}}"#;
        let err = parse_decision(raw).unwrap_err();
        match &err {
            DecisionError::UnknownAction { field, value, .. } => {
                assert_eq!(*field, "turn_action");
                assert_eq!(value, "SPEAK_GUIDE");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("SPEAK_AVATAR, SPEAK_PARTNER"));

        let raw = r#"{"turn_action":"SPEAK_AVATAR","topic_action":"PAUSE","guidance_list":["推进"]}"#;
        assert!(matches!(
            parse_decision(raw),
            Err(DecisionError::UnknownAction { field: "topic_action", .. })
        ));
    }

    #[test]
    fn test_turn_action_aliases() {
        for (wire, expected) in [
            ("SPEAK_USER_DIGITAL_AVATAR", TurnAction::SpeakAvatar),
            ("SPEAK_USER_AVATAR", TurnAction::SpeakAvatar),
            ("SPEAK_TRAVEL_PARTNER", TurnAction::SpeakPartner),
        ] {
            let raw = format!(
                r#"{{"turn_action":"{wire}","topic_action":"CONTINUE_TOPIC","guidance_list":["推进主题"],"topic_args":{{"topic":"美食"}}}}"#
            );
            assert_eq!(parse_decision(&raw).unwrap().turn_action, expected);
        }
    }

    #[test]
    fn test_guidance_rules() {
        let raw = r#"{"turn_action":"SPEAK_AVATAR","topic_action":"INIT_AND_GENERATE","guidance_list":[]}"#;
        assert_eq!(parse_decision(raw), Err(DecisionError::EmptyGuidance));

        let raw = r#"{"turn_action":"SPEAK_AVATAR","topic_action":"INIT_AND_GENERATE","guidance_list":["推进主题","好"]}"#;
        assert!(matches!(
            parse_decision(raw),
            Err(DecisionError::GuidanceTooShort { index: 1, .. })
        ));

        let raw = r#"{"turn_action":"SPEAK_AVATAR","topic_action":"INIT_AND_GENERATE","guidance_list":["一一","二二","三三","四四"],"topic_args":{"new_topic":{"title":"为什么去京都"}}}"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.guidance_list.len(), MAX_GUIDANCE);
        assert_eq!(decision.opened_topic().unwrap().title, "为什么去京都");
    }

    #[test]
    fn test_fenced_and_wrapped_json() {
        let raw = "好的，决策如下：\n```json\n{\"turn_action\":\"SPEAK_AVATAR\",\"topic_action\":\"CONTINUE_TOPIC\",\"guidance_list\":[\"推进主题\"],\"topic_args\":{\"topic\":\"美食\"}}\n```";
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.speaking_topic(), Some("美食"));
        assert!(decision.opened_topic().is_none());

        assert!(matches!(parse_decision("no json here"), Err(DecisionError::Parse(_))));
        assert!(matches!(parse_decision("{not json}"), Err(DecisionError::Parse(_))));
    }
}
