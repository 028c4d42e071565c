//! Sentence (quotation) model and its category.

use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Sentence category.
///
/// The remote API knows twelve single-letter categories. Anything else,
/// including "no category requested", lands in [`Category::Unclassified`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Anime,
    Comic,
    Game,
    Literature,
    Original,
    Internet,
    Other,
    Film,
    Poetry,
    NeteaseMusic,
    Philosophy,
    Wit,
    Unclassified,
}

impl Category {
    /// The twelve remote categories, in wire-letter order.
    pub const ALL: [Category; 12] = [
        Category::Anime,
        Category::Comic,
        Category::Game,
        Category::Literature,
        Category::Original,
        Category::Internet,
        Category::Other,
        Category::Film,
        Category::Poetry,
        Category::NeteaseMusic,
        Category::Philosophy,
        Category::Wit,
    ];

    /// Wire code: `a`..`l`, or `default` for the unclassified bucket.
    pub fn code(self) -> &'static str {
        match self {
            Category::Anime => "a",
            Category::Comic => "b",
            Category::Game => "c",
            Category::Literature => "d",
            Category::Original => "e",
            Category::Internet => "f",
            Category::Other => "g",
            Category::Film => "h",
            Category::Poetry => "i",
            Category::NeteaseMusic => "j",
            Category::Philosophy => "k",
            Category::Wit => "l",
            Category::Unclassified => "default",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Category::Anime => "Anime",
            Category::Comic => "Comic",
            Category::Game => "Game",
            Category::Literature => "Literature",
            Category::Original => "Original",
            Category::Internet => "Internet",
            Category::Other => "Other",
            Category::Film => "Film",
            Category::Poetry => "Poetry",
            Category::NeteaseMusic => "NetEase Music",
            Category::Philosophy => "Philosophy",
            Category::Wit => "Wit",
            Category::Unclassified => "Unclassified",
        }
    }

    /// Label used by the upstream API's own documentation.
    pub fn native_label(self) -> &'static str {
        match self {
            Category::Anime => "动画",
            Category::Comic => "漫画",
            Category::Game => "游戏",
            Category::Literature => "文学",
            Category::Original => "原创",
            Category::Internet => "网络",
            Category::Other => "其他",
            Category::Film => "影视",
            Category::Poetry => "诗词",
            Category::NeteaseMusic => "网易云",
            Category::Philosophy => "哲学",
            Category::Wit => "抖机灵",
            Category::Unclassified => "未分类",
        }
    }

    /// Exact wire code lookup. Only the twelve remote letters match.
    pub fn from_code(code: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Lenient parse of a user-supplied category argument.
    ///
    /// Accepts a display name or native label, otherwise the first `a`-`l`
    /// letter found in the text.
    pub fn parse_arg(text: &str) -> Option<Category> {
        let t = text.trim();
        if t.is_empty() {
            return None;
        }
        if let Some(c) = Category::ALL
            .into_iter()
            .find(|c| c.display_name().eq_ignore_ascii_case(t) || c.native_label() == t)
        {
            return Some(c);
        }

        static LETTER: OnceLock<Regex> = OnceLock::new();
        let re = LETTER.get_or_init(|| Regex::new("[a-l]").expect("valid regex"));
        re.find(t).and_then(|m| Category::from_code(m.as_str()))
    }

    /// Bucket a sentence belongs to: the explicit request wins, then the
    /// sentence's own category (which is `Unclassified` when unknown).
    pub fn resolve(explicit: Option<Category>, sentence: &Sentence) -> Category {
        explicit.unwrap_or(sentence.category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Category::from_code(s.trim()).unwrap_or(Category::Unclassified)
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.code().to_string()
    }
}

/// One quotation as served by the remote API.
///
/// Identity is the numeric `id`; two sentences with the same id are the same
/// quotation regardless of the other fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sentence {
    pub id: u64,
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "hitokoto")]
    pub text: String,
    #[serde(rename = "type", default = "unclassified")]
    pub category: Category,
    #[serde(rename = "from", default)]
    pub source: Option<String>,
    #[serde(rename = "from_who", default)]
    pub author: Option<String>,
    /// Account that submitted the sentence upstream.
    #[serde(default)]
    pub creator: Option<String>,
    /// Upstream creation time (unix seconds, as a string).
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub length: usize,
}

fn unclassified() -> Category {
    Category::Unclassified
}

#[cfg(test)]
pub(crate) fn sample(id: u64, category: Category) -> Sentence {
    Sentence {
        id,
        uuid: format!("00000000-0000-0000-0000-{id:012}"),
        text: format!("sentence number {id}"),
        category,
        source: Some("Some Book".to_string()),
        author: None,
        creator: Some("tester".to_string()),
        created_at: "1468605909".to_string(),
        length: 17,
    }
}
