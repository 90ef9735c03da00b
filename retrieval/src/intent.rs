//! Verb intent detection.

use apiq_spec_parser::HttpMethod;
use serde::Serialize;

/// How the intent was decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "keyword")]
pub enum IntentSource {
    /// A lexicon keyword matched this word of the request.
    Keyword(String),
    /// Nothing matched; the lexicon default was used.
    Default,
}

/// The HTTP method a request's wording implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Intent {
    pub method: HttpMethod,
    pub source: IntentSource,
}

/// Keyword → method lexicon.
///
/// The longest matching keyword wins; equal lengths go to the one appearing
/// first in the text. Keywords match whole words and their simple inflections
/// (`s`, `es`, `d`, `ed`, `ing`, and `ing` with a dropped final `e`).
/// Exact keywords match only the bare word, so `new` does not match `news`.
#[derive(Debug, Clone)]
pub struct IntentLexicon {
    keywords: Vec<Keyword>,
    default: HttpMethod,
}

#[derive(Debug, Clone)]
struct Keyword {
    word: String,
    method: HttpMethod,
    exact: bool,
}

impl Keyword {
    fn matches(&self, word: &str) -> bool {
        if self.exact {
            word == self.word
        } else {
            inflection_of(word, &self.word)
        }
    }
}

impl IntentLexicon {
    /// An empty lexicon that always answers `default`.
    pub fn new(default: HttpMethod) -> Self {
        Self {
            keywords: Vec::new(),
            default,
        }
    }

    pub fn with_keyword(self, keyword: impl Into<String>, method: HttpMethod) -> Self {
        self.push(keyword.into(), method, false)
    }

    /// A keyword that matches no inflections.
    pub fn with_exact_keyword(self, keyword: impl Into<String>, method: HttpMethod) -> Self {
        self.push(keyword.into(), method, true)
    }

    fn push(mut self, keyword: String, method: HttpMethod, exact: bool) -> Self {
        self.keywords.push(Keyword {
            word: keyword.to_lowercase(),
            method,
            exact,
        });
        self
    }

    pub fn with_keywords<'a>(
        self,
        keywords: impl IntoIterator<Item = &'a str>,
        method: HttpMethod,
    ) -> Self {
        keywords
            .into_iter()
            .fold(self, |lexicon, keyword| lexicon.with_keyword(keyword, method))
    }

    pub fn default_method(&self) -> HttpMethod {
        self.default
    }

    pub fn detect(&self, text: &str) -> Intent {
        let lower = text.to_lowercase();
        let words = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty());

        // (keyword length, word position)
        let mut best: Option<(usize, usize, &str, HttpMethod)> = None;
        for (position, word) in words.enumerate() {
            for keyword in &self.keywords {
                if !keyword.matches(word) {
                    continue;
                }
                let len = keyword.word.len();
                let better = match best {
                    None => true,
                    Some((best_len, pos, _, _)) => {
                        len > best_len || (len == best_len && position < pos)
                    }
                };
                if better {
                    best = Some((len, position, keyword.word.as_str(), keyword.method));
                }
            }
        }

        match best {
            Some((_, _, keyword, method)) => Intent {
                method,
                source: IntentSource::Keyword(keyword.to_string()),
            },
            None => Intent {
                method: self.default,
                source: IntentSource::Default,
            },
        }
    }
}

impl Default for IntentLexicon {
    fn default() -> Self {
        Self::new(HttpMethod::Get)
            .with_keywords(["create", "add"], HttpMethod::Post)
            .with_exact_keyword("new", HttpMethod::Post)
            .with_keywords(["update", "edit", "modify"], HttpMethod::Put)
            .with_keywords(["delete", "remove"], HttpMethod::Delete)
            .with_keywords(["find", "get", "list", "show", "search"], HttpMethod::Get)
    }
}

fn inflection_of(word: &str, keyword: &str) -> bool {
    let Some(suffix) = word.strip_prefix(keyword) else {
        return keyword
            .strip_suffix('e')
            .and_then(|stem| word.strip_prefix(stem))
            .is_some_and(|rest| rest == "ing");
    };
    matches!(suffix, "" | "s" | "es" | "d" | "ed" | "ing")
}
