use indexmap::IndexMap;

/// The reply word of a data record.
pub const RE: &str = "!re";
/// The reply word closing a successful command.
pub const DONE: &str = "!done";
/// The reply word reporting a failed command.
pub const TRAP: &str = "!trap";
/// The reply word reporting an unrecoverable condition.
pub const FATAL: &str = "!fatal";
/// The reply word sent in place of `!re` when a listing is empty.
pub const EMPTY: &str = "!empty";

// Prefix of the tag word.
const TAG_PREFIX: &str = ".tag=";

/// A reply sentence received from a device.
///
/// The first word identifies the sentence, the `=key=value` words become
/// attributes in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    /// Reply word, such as `!re` or `!done`.
    pub word: String,
    /// Optional tag.
    pub tag: Option<String>,
    /// Attributes.
    pub attributes: IndexMap<String, String>,
}

impl Sentence {
    /// Parses a [`Sentence`] from its words.
    ///
    /// Words which are neither attributes nor tags are ignored.
    #[must_use]
    pub fn parse<I, W>(words: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsRef<str>,
    {
        let mut words = words.into_iter();
        let mut sentence = Self {
            word: words
                .next()
                .map(|word| word.as_ref().to_owned())
                .unwrap_or_default(),
            ..Self::default()
        };

        for word in words {
            let word = word.as_ref();
            if let Some(tag) = word.strip_prefix(TAG_PREFIX) {
                sentence.tag = Some(tag.to_owned());
            } else if let Some(attribute) = word.strip_prefix('=') {
                let (key, value) = attribute.split_once('=').unwrap_or((attribute, ""));
                sentence.attributes.insert(key.to_owned(), value.to_owned());
            }
        }

        sentence
    }

    /// Returns the value of an attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Whether this sentence closes a successful command.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.word == DONE
    }
}

/// A complete reply to a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Data records, in the order sent by the device.
    pub re: Vec<Sentence>,
    /// Terminal sentence.
    pub done: Sentence,
}

impl Reply {
    /// Returns the identifier returned by the device in the terminal
    /// sentence, if any.
    ///
    /// Commands such as `add` return the identifier of the new item.
    #[must_use]
    pub fn ret(&self) -> Option<&str> {
        self.done.get("ret")
    }
}
