//! Топики и их сегменты.
//!
//! Топик — непустая строка из сегментов, разделённых точкой (`orders.eu.created`).
//! Два сегмента зарезервированы:
//! - `*` совпадает ровно с одним сегментом;
//! - `**` совпадает с остатком топика (ноль или больше сегментов).

use std::{fmt, str::FromStr};

use crate::error::{PubSubError, PubSubResult};

/// Разделитель сегментов.
pub const SEPARATOR: char = '.';
/// Сегмент, совпадающий ровно с одним сегментом.
pub const ANY: &str = "*";
/// Сегмент, поглощающий остаток топика.
pub const ALL: &str = "**";

/// Один сегмент топика.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Literal(Box<str>),
    Any,
    All,
}

impl Segment {
    pub fn parse(raw: &str) -> Self {
        match raw {
            ANY => Segment::Any,
            ALL => Segment::All,
            other => Segment::Literal(other.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Segment::Literal(s) => s,
            Segment::Any => ANY,
            Segment::All => ALL,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        !matches!(self, Segment::Literal(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Разбирает строку топика в сегменты.
///
/// Пустая строка и пустые сегменты (`.a`, `a.`, `a..b`) — ошибка
/// [`PubSubError::InvalidTopic`].
pub fn split(raw: &str) -> PubSubResult<Vec<Segment>> {
    if raw.is_empty() {
        return Err(PubSubError::invalid_topic(raw));
    }
    raw.split(SEPARATOR)
        .map(|part| {
            if part.is_empty() {
                Err(PubSubError::invalid_topic(raw))
            } else {
                Ok(Segment::parse(part))
            }
        })
        .collect()
}

/// Проверенный топик: исходная строка плюс разобранные сегменты.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    raw: String,
    segments: Vec<Segment>,
}

impl Topic {
    pub fn parse(raw: &str) -> PubSubResult<Self> {
        let segments = split(raw)?;
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Количество сегментов (всегда >= 1).
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn has_wildcards(&self) -> bool {
        self.segments.iter().any(Segment::is_wildcard)
    }

    /// Совпадает ли опубликованный `topic` с этим топиком как с шаблоном
    /// подписки.
    ///
    /// Повторяет правила доставки дерева подписок: `**` поглощает остаток
    /// только последним сегментом шаблона, сегменты после `**` не
    /// совпадают ни с чем. Литеральный сегмент шаблона совпадает только с
    /// таким же литералом.
    pub fn matches(
        &self,
        topic: &Topic,
    ) -> bool {
        matches_segments(&self.segments, &topic.segments)
    }
}

fn matches_segments(
    pattern: &[Segment],
    topic: &[Segment],
) -> bool {
    match (pattern.split_first(), topic.split_first()) {
        (Some((Segment::All, rest)), _) => rest.is_empty(),
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some((Segment::Any, p_rest)), Some((_, t_rest))) => matches_segments(p_rest, t_rest),
        (Some((lit @ Segment::Literal(_), p_rest)), Some((seg, t_rest))) => {
            lit == seg && matches_segments(p_rest, t_rest)
        }
    }
}

impl FromStr for Topic {
    type Err = PubSubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

impl fmt::Display for Topic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}
