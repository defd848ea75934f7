//! Block types: the nodes of a document tree.
//!
//! A [`Block`] carries a typed [`BlockContent`] payload plus presentation
//! fields (background color, alignment) that live on the node rather than the
//! content. Children are an ordered list of ids; the store keeps them in a
//! separate adjacency map so content and structure can change independently.
//!
//! ## Design: content variants
//!
//! `BlockContent` is a closed sum type. Variants the replica does not
//! interpret in detail (`Latex`, `Table`, …) still round-trip through
//! [`BlockContent::Unsupported`] rather than being dropped, so a document
//! never loses nodes because the client is older than the authority.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::dataview::DataViewContent;
use crate::ids::{BlockId, ObjectId};

/// A node of document content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub content: BlockContent,
    /// Ordered child ids. No duplicates.
    #[serde(default)]
    pub children_ids: Vec<BlockId>,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub alignment: Alignment,
    /// Free-form presentation fields (width, layout hints…).
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Block {
    /// A block with the given content and no children.
    pub fn new(id: impl Into<BlockId>, content: BlockContent) -> Self {
        Self {
            id: id.into(),
            content,
            children_ids: Vec::new(),
            background_color: None,
            alignment: Alignment::default(),
            fields: serde_json::Map::new(),
        }
    }

    /// Builder-style: set children.
    pub fn with_children<I, T>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<BlockId>,
    {
        self.children_ids = children.into_iter().map(Into::into).collect();
        self
    }

    /// Shorthand for a paragraph text block.
    pub fn text(id: impl Into<BlockId>, text: impl Into<String>) -> Self {
        Self::new(id, BlockContent::Text(TextContent::new(text)))
    }

    /// Shorthand for a smartblock (page root) block.
    pub fn smartblock(id: impl Into<BlockId>) -> Self {
        Self::new(id, BlockContent::Smartblock)
    }

    /// Text payload, if this is a text block.
    pub fn text_content(&self) -> Option<&TextContent> {
        match &self.content {
            BlockContent::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Data-view payload, if this is a data-view block.
    pub fn dataview(&self) -> Option<&DataViewContent> {
        match &self.content {
            BlockContent::DataView(dv) => Some(dv),
            _ => None,
        }
    }

    /// Whether this block collapses its descendants (toggle list item).
    pub fn is_toggle(&self) -> bool {
        self.text_content().is_some_and(|t| t.style.is_toggle())
    }
}

/// Block alignment (carried on the node, not the content).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

/// Tagged union over block payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BlockContent {
    /// Root of a page; carries no payload of its own.
    Smartblock,
    Text(TextContent),
    File(FileContent),
    Bookmark(BookmarkContent),
    Divider(DividerContent),
    Link(LinkContent),
    Layout(LayoutContent),
    #[serde(rename = "dataview")]
    DataView(DataViewContent),
    /// Renders one relation value of the context object.
    Relation { key: String },
    /// Renders the featured relations of the context object.
    FeaturedRelations,
    TableOfContents,
    /// A payload kind this client does not interpret.
    Unsupported { kind: String },
}

impl BlockContent {
    /// Short kind name, for logging.
    pub fn kind(&self) -> &str {
        match self {
            BlockContent::Smartblock => "smartblock",
            BlockContent::Text(_) => "text",
            BlockContent::File(_) => "file",
            BlockContent::Bookmark(_) => "bookmark",
            BlockContent::Divider(_) => "divider",
            BlockContent::Link(_) => "link",
            BlockContent::Layout(_) => "layout",
            BlockContent::DataView(_) => "dataview",
            BlockContent::Relation { .. } => "relation",
            BlockContent::FeaturedRelations => "featuredRelations",
            BlockContent::TableOfContents => "tableOfContents",
            BlockContent::Unsupported { kind } => kind,
        }
    }
}

// ============================================================================
// Text
// ============================================================================

/// Text payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub text: String,
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default)]
    pub marks: Vec<Mark>,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon_emoji: Option<String>,
}

impl TextContent {
    /// A paragraph with the given text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    /// Builder-style: set style.
    pub fn with_style(mut self, style: TextStyle) -> Self {
        self.style = style;
        self
    }
}

/// Text block style (a.k.a. content type).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum TextStyle {
    #[default]
    Paragraph,
    Header1,
    Header2,
    Header3,
    Quote,
    Code,
    Title,
    Description,
    Checkbox,
    /// Bulleted list item.
    #[strum(serialize = "marked", serialize = "bulleted")]
    Marked,
    Numbered,
    /// Collapsible list item; hides its children when collapsed.
    Toggle,
    Callout,
}

impl TextStyle {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TextStyle::Paragraph => "paragraph",
            TextStyle::Header1 => "header1",
            TextStyle::Header2 => "header2",
            TextStyle::Header3 => "header3",
            TextStyle::Quote => "quote",
            TextStyle::Code => "code",
            TextStyle::Title => "title",
            TextStyle::Description => "description",
            TextStyle::Checkbox => "checkbox",
            TextStyle::Marked => "marked",
            TextStyle::Numbered => "numbered",
            TextStyle::Toggle => "toggle",
            TextStyle::Callout => "callout",
        }
    }

    /// Toggle items control visibility of their descendants.
    pub fn is_toggle(&self) -> bool {
        matches!(self, TextStyle::Toggle)
    }

    /// List-like styles that nest children visually.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            TextStyle::Checkbox | TextStyle::Marked | TextStyle::Numbered | TextStyle::Toggle
        )
    }
}

impl std::fmt::Display for TextStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inline formatting over a character range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub from: u32,
    pub to: u32,
    pub kind: MarkKind,
    /// Kind-specific parameter (link url, mention object id, color…).
    #[serde(default)]
    pub param: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkKind {
    Bold,
    Italic,
    Strikethrough,
    Keyboard,
    Underscored,
    Link,
    Mention,
    Object,
    TextColor,
    BackgroundColor,
    Emoji,
}

// ============================================================================
// Other payloads
// ============================================================================

/// Attached file, image, video, or audio.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FileContent {
    pub hash: String,
    pub name: String,
    pub kind: FileKind,
    pub state: LoadState,
    pub mime: String,
    pub size: u64,
    pub target_object_id: Option<ObjectId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[default]
    File,
    Image,
    Video,
    Audio,
    Pdf,
}

/// Upload/fetch state shared by file and bookmark payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Empty,
    Uploading,
    Done,
    Error,
}

/// Web bookmark.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BookmarkContent {
    pub url: String,
    pub title: String,
    pub description: String,
    pub image_hash: String,
    pub favicon_hash: String,
    pub target_object_id: Option<ObjectId>,
    pub state: LoadState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DividerContent {
    pub style: DividerStyle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DividerStyle {
    #[default]
    Line,
    Dots,
}

/// Link to another object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkContent {
    pub target_block_id: ObjectId,
    #[serde(default)]
    pub card_style: LinkCardStyle,
    #[serde(default)]
    pub relations: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkCardStyle {
    #[default]
    Text,
    Card,
    Inline,
}

/// Structural container with no content of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LayoutContent {
    pub style: LayoutStyle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum LayoutStyle {
    Row,
    Column,
    #[default]
    Div,
    Header,
    TableRows,
    TableColumns,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_style_from_str_aliases() {
        assert_eq!(TextStyle::from_str("TOGGLE"), Some(TextStyle::Toggle));
        assert_eq!(TextStyle::from_str("bulleted"), Some(TextStyle::Marked));
        assert_eq!(TextStyle::from_str("nope"), None);
    }

    #[test]
    fn test_is_toggle() {
        let mut block = Block::text("a", "hi");
        assert!(!block.is_toggle());
        block.content = BlockContent::Text(TextContent::new("hi").with_style(TextStyle::Toggle));
        assert!(block.is_toggle());
        assert!(!Block::smartblock("root").is_toggle());
    }

    #[test]
    fn test_with_children() {
        let block = Block::smartblock("root").with_children(["a", "b"]);
        assert_eq!(block.children_ids, vec![BlockId::new("a"), BlockId::new("b")]);
    }

    #[test]
    fn test_content_json_shape() {
        let block = Block::text("a", "hi");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["content"]["type"], "text");
        assert_eq!(json["content"]["text"], "hi");
        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }
}
