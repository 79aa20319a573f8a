use std::borrow::Cow;

use crate::util::unescape_text;

/// One child node of an offer element.
///
/// Text is stored already sanitized (escaped form), so serialization copies
/// it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Element(Field),
}

/// A named child element of an offer, with its attributes and content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    /// Attribute values in escaped form, ready to go between double quotes.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Convenience constructor for a field holding a single text node.
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: vec![Node::Text(text.into())],
        }
    }

    /// Concatenated direct text children, still in escaped form.
    pub fn raw_text(&self) -> Cow<'_, str> {
        let mut texts = self.children.iter().filter_map(|n| match n {
            Node::Text(t) => Some(t.as_str()),
            Node::Element(_) => None,
        });
        match (texts.next(), texts.next()) {
            (None, _) => Cow::Borrowed(""),
            (Some(only), None) => Cow::Borrowed(only),
            (Some(first), Some(second)) => {
                let mut joined = format!("{first}{second}");
                texts.for_each(|t| joined.push_str(t));
                Cow::Owned(joined)
            }
        }
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        write_attributes(&self.attributes, out);
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(f) => f.write_xml(out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// A `<category>` definition taken from a feed's categories block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    /// Display name in escaped form; may be empty.
    pub name: String,
}

/// A product record extracted from one feed.
///
/// The element is treated as opaque apart from the handful of fields the
/// aggregator needs: `name`, `price`, `vendorCode`, `categoryId` and the
/// quantity fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    /// Attributes of the `<offer>` element itself, escaped form.
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order. Whitespace-only text is not kept.
    pub fields: Vec<Field>,
    /// 1-based position of the source feed in the feed list.
    pub source_feed_index: usize,
    /// The feed's own `id` attribute, possibly empty.
    pub local_id: String,
    /// `vendorCode` child text, when present and non-blank.
    pub vendor_code: Option<String>,
    /// Globally unique key, `{feed prefix}_{normalized base}`.
    pub resolved_id: String,
}

impl Offer {
    /// First child element named `name`.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Unescaped, trimmed text of the first `name` child; empty when absent.
    pub fn field_text(&self, name: &str) -> String {
        self.field(name)
            .map(|f| unescape_text(f.raw_text().trim()).into_owned())
            .unwrap_or_default()
    }

    /// Unescaped value of an attribute on the `<offer>` element.
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| unescape_text(v).into_owned())
    }

    pub fn name(&self) -> String {
        self.field_text("name")
    }

    pub fn price(&self) -> String {
        self.field_text("price")
    }

    /// Stock level, from `quantity` or else `stock_quantity`.
    pub fn quantity(&self) -> String {
        let q = self.field_text("quantity");
        if q.is_empty() {
            self.field_text("stock_quantity")
        } else {
            q
        }
    }

    /// Category reference, empty when the offer has none.
    pub fn category_id(&self) -> String {
        self.field_text("categoryId")
    }

    /// Serializes the offer as a single `<offer>` element.
    ///
    /// The `id` attribute is replaced by (or set to) the resolved id so that
    /// a later run can key its snapshot on it.
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(256);
        let mut attributes = Vec::with_capacity(self.attributes.len() + 1);
        attributes.push(("id".to_string(), self.resolved_id.clone()));
        attributes.extend(self.attributes.iter().filter(|(k, _)| k != "id").cloned());

        out.push_str("<offer");
        write_attributes(&attributes, &mut out);
        out.push('>');
        for field in &self.fields {
            field.write_xml(&mut out);
        }
        out.push_str("</offer>");
        out
    }
}

fn write_attributes(attributes: &[(String, String)], out: &mut String) {
    for (key, value) in attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(value);
        out.push('"');
    }
}
