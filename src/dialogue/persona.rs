//! 发言角色：数字分身 / 旅行伙伴
//!
//! 每个变体自带「查哪份人设、渲染哪份台词 prompt」，新增第三个角色时编译器会指出所有要补的分支。

use super::context::ConversationContext;
use super::decision::{Decision, TurnAction};
use super::prompt;
use crate::store::{Persona, SpeakerRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    Avatar,
    Partner,
}

impl From<TurnAction> for Speaker {
    fn from(action: TurnAction) -> Self {
        match action {
            TurnAction::SpeakAvatar => Speaker::Avatar,
            TurnAction::SpeakPartner => Speaker::Partner,
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.role().as_str())
    }
}

impl Speaker {
    pub fn role(self) -> SpeakerRole {
        match self {
            Speaker::Avatar => SpeakerRole::Avatar,
            Speaker::Partner => SpeakerRole::Partner,
        }
    }

    /// 对话中的另一方
    pub fn counterpart(self) -> Speaker {
        match self {
            Speaker::Avatar => Speaker::Partner,
            Speaker::Partner => Speaker::Avatar,
        }
    }

    pub fn persona(self, ctx: &ConversationContext) -> Option<&Persona> {
        match self {
            Speaker::Avatar => ctx.avatar(),
            Speaker::Partner => ctx.partner(),
        }
    }

    /// 渲染本角色的台词 prompt
    pub fn speak_prompt(
        self,
        ctx: &ConversationContext,
        decision: &Decision,
        me: &Persona,
        history_count: usize,
    ) -> String {
        let template = match self {
            Speaker::Avatar => prompt::AVATAR_SPEAK_TEMPLATE,
            Speaker::Partner => prompt::PARTNER_SPEAK_TEMPLATE,
        };
        prompt::render_speak(template, ctx, decision, me, self.counterpart(), history_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_action_maps_to_speaker() {
        assert_eq!(Speaker::from(TurnAction::SpeakAvatar), Speaker::Avatar);
        assert_eq!(Speaker::from(TurnAction::SpeakPartner), Speaker::Partner);
        assert_eq!(Speaker::Avatar.counterpart(), Speaker::Partner);
        assert_eq!(Speaker::Partner.to_string(), "partner");
    }
}
