//! Disconnect message templates.
//!
//! Templates are parsed once when a policy is built, so an unknown placeholder
//! surfaces as a configuration error instead of leaking into a kick message.
//! Only three placeholders exist:
//!
//! * `{player}` - display name of the session
//! * `{mods}` - matched denylist identifiers joined with `", "`
//! * `{plural}` - `"s"` when more than one identifier matched, empty otherwise

use crate::error::{Result, VerifierError};
use std::fmt;

/// Colour-code escape used by the client.
const SECTION_SIGN: char = '§';

/// A recognised placeholder name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Player,
    Mods,
    Plural,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "player" => Some(Placeholder::Player),
            "mods" => Some(Placeholder::Mods),
            "plural" => Some(Placeholder::Plural),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Placeholder::Player => "player",
            Placeholder::Mods => "mods",
            Placeholder::Plural => "plural",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct Substitutions<'a> {
    pub player: &'a str,
    pub mods: &'a [String],
}

impl Substitutions<'_> {
    fn value(&self, placeholder: Placeholder) -> String {
        match placeholder {
            Placeholder::Player => self.player.to_string(),
            Placeholder::Mods => self.mods.join(", "),
            Placeholder::Plural => {
                if self.mods.len() > 1 {
                    "s".to_string()
                } else {
                    String::new()
                }
            }
        }
    }
}

/// A parsed message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl MessageTemplate {
    /// Parse a template, rejecting placeholder names outside the fixed set.
    ///
    /// A brace pair only counts as a placeholder when its content is a
    /// non-empty run of ASCII alphanumerics or underscores; any other brace is
    /// kept as literal text.
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let token = after.find('}').map(|close| &after[..close]).filter(|name| {
                !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            });

            match token {
                Some(name) => {
                    let placeholder =
                        Placeholder::from_name(name).ok_or_else(|| VerifierError::Template {
                            template: source.to_string(),
                            reason: format!("unknown placeholder {{{}}}", name),
                        })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(placeholder));
                    rest = &after[name.len() + 1..];
                }
                None => {
                    literal.push('{');
                    rest = after;
                }
            }
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Original template text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Placeholders referenced by this template, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = Placeholder> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(p) => Some(*p),
            Segment::Literal(_) => None,
        })
    }

    /// Render the template.
    ///
    /// With `translate_color_codes` set, `&` in literal text becomes the
    /// section sign. Substituted values are never translated.
    pub fn render(&self, subs: &Substitutions<'_>, translate_color_codes: bool) -> String {
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) if translate_color_codes => {
                    out.extend(text.chars().map(|c| if c == '&' { SECTION_SIGN } else { c }));
                }
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(p) => out.push_str(&subs.value(*p)),
            }
        }
        out
    }
}

impl fmt::Display for MessageTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.name())
    }
}
