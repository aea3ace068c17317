//! Wire codes shared by the notification payloads.
//!
//! The hitokoto services encode the sentence category as a single
//! letter and poll verdicts as integer codes; mails print the labels.

use serde::{Deserialize, Serialize};

/// Sentence category code, `a` through `l` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct HitokotoType(String);

impl HitokotoType {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn is_known(&self) -> bool {
        matches!(
            self.0.as_str(),
            "a" | "b" | "c" | "d" | "e" | "f" | "g" | "h" | "i" | "j" | "k" | "l"
        )
    }

    pub fn label(&self) -> &'static str {
        match self.0.as_str() {
            "a" => "Anime - 动画",
            "b" => "Comic – 漫画",
            "c" => "Game - 游戏",
            "d" => "Literature - 文学",
            "e" => "Original - 原创",
            "f" => "Internet - 来自网络",
            "g" => "Other - 其他",
            "h" => "Video - 影视",
            "i" => "Poetry - 古诗词",
            "j" => "NetEase - 网易云音乐",
            "k" => "Philosophy - 哲学",
            "l" => "Joke - 抖机灵",
            _ => "Unknown - 未知",
        }
    }
}

/// Poll verdict code. 200 and up are terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct PollStatus(i64);

impl PollStatus {
    pub const APPROVED: Self = Self(200);

    pub fn new(code: i64) -> Self {
        Self(code)
    }

    pub fn code(self) -> i64 {
        self.0
    }

    pub fn is_approved(self) -> bool {
        self == Self::APPROVED
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            0 => "未开放",
            1 => "开放",
            2 => "处理中",
            100 => "暂停",
            101 => "已关闭",
            102 => "开放给普通用户投票",
            200 => "入库",
            201 => "驳回",
            202 => "亟待修改",
            _ => "未知",
        }
    }
}

/// How a reviewer voted on a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct PollMethod(i64);

impl PollMethod {
    pub fn new(code: i64) -> Self {
        Self(code)
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "赞同",
            2 => "驳回",
            3 => "亟待修改",
            4 => "需要普通用户投票",
            _ => "未知",
        }
    }
}
