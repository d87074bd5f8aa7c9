//! # Short-Circuit Gates
//!
//! Data-driven trigger sets deciding whether a query can skip retrieval:
//!
//! - [`GreetingFilter`]: short greeting-only input gets a canned reply with
//!   no model call.
//! - [`RecallGate`]: questions about the conversation itself ("what was the
//!   budget I mentioned?") are answered from session history with a single
//!   model call. Plain factual questions ("what was the price of X?") are
//!   not recall; a back-reference to what was said is required.
//!
//! Patterns are plain regular expressions injected at construction, so new
//! languages are added through configuration rather than code. Matching is
//! case-insensitive.

use regex::Regex;

/// Greeting-only inputs longer than this are routed normally.
pub const MAX_GREETING_WORDS: usize = 4;

pub const DEFAULT_GREETING_REPLY: &str =
    "Hello! I can help with our services, pricing, team and your project questions. \
     What would you like to know?";

/// English, Spanish, French and Vietnamese greetings, anchored to the whole input.
pub const DEFAULT_GREETING_PATTERNS: &[&str] = &[
    r"^(hi|hello|hey|hiya|yo|greetings)( there| team| all)?[\s!.,]*$",
    r"^good (morning|afternoon|evening|day)[\s!.,]*$",
    r"^(hola|buenos d[ií]as|buenas tardes|buenas noches|qu[eé] tal)[\s!.,¡]*$",
    r"^(bonjour|bonsoir|salut|coucou)[\s!.,]*$",
    r"^(xin ch[aà]o|ch[aà]o)( b[aạ]n)?[\s!.,]*$",
    r"^(thanks|thank you|thx|gracias|merci|c[aả]m [oơ]n)( (so|very) much)?[\s!.,]*$",
];

/// Phrases that refer back to earlier turns of the same conversation.
pub const DEFAULT_RECALL_PATTERNS: &[&str] = &[
    r"\b(what|which|how much) (was|were|is) (the|my|our) .+ (i|we) (said|mentioned|told you|gave)\b",
    r"\bwhat (was|were) (the|my|our) .*\b(said|mentioned|told|agreed|discussed|gave)\b",
    r"\bwhat (was|were) (my|our) .+\bagain\b",
    r"\bwhat did (i|we|you) (say|mention|tell|ask)\b",
    r"\bdid (i|we) (say|mention|tell you)\b",
    r"\b(earlier|previously|before|last time)\b.*\b(said|mentioned|told|asked|discussed)\b",
    r"\bremind me\b",
    r"\b(recap|summari[sz]e) (our|the|this) (conversation|chat|discussion)\b",
    r"\bqu[eé] (dije|mencion[eé]|dijimos|te dije)\b",
    r"\brecu[eé]rdame\b",
    r"\brappel(le|ez)[- ]moi\b",
    r"\bqu'est-ce que (j'ai|nous avons) dit\b",
    r"\b(nhắc lại|tôi đã nói|mình đã nói)\b",
];

/// An immutable set of case-insensitive patterns.
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    patterns: Vec<Regex>,
}

impl TriggerSet {
    /// Compile the given patterns. Fails on the first invalid expression.
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(&format!("(?i){}", p.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Returns `true` if any pattern matches the normalized input.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        let normalized = normalize(text);
        self.patterns.iter().any(|re| re.is_match(&normalized))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Canned reply for greeting-only input.
#[derive(Debug, Clone)]
pub struct GreetingFilter {
    triggers: TriggerSet,
    reply: String,
}

impl GreetingFilter {
    #[must_use]
    pub fn new(triggers: TriggerSet, reply: impl Into<String>) -> Self {
        Self { triggers, reply: reply.into() }
    }

    /// Filter using the built-in multilingual patterns.
    pub fn with_defaults() -> Result<Self, regex::Error> {
        Ok(Self::new(TriggerSet::new(DEFAULT_GREETING_PATTERNS)?, DEFAULT_GREETING_REPLY))
    }

    /// The canned reply if `text` is a short greeting, `None` otherwise.
    #[must_use]
    pub fn check(&self, text: &str) -> Option<&str> {
        let words = text.split_whitespace().count();
        if words == 0 || words > MAX_GREETING_WORDS {
            return None;
        }
        self.triggers.matches(text).then_some(self.reply.as_str())
    }
}

/// Detects questions about the conversation itself.
#[derive(Debug, Clone)]
pub struct RecallGate {
    triggers: TriggerSet,
}

impl RecallGate {
    #[must_use]
    pub fn new(triggers: TriggerSet) -> Self {
        Self { triggers }
    }

    pub fn with_defaults() -> Result<Self, regex::Error> {
        Ok(Self::new(TriggerSet::new(DEFAULT_RECALL_PATTERNS)?))
    }

    #[must_use]
    pub fn is_recall(&self, text: &str) -> bool {
        self.triggers.matches(text)
    }
}

/// Words that open a question or an instruction.
const LEADING_INTERROGATIVES: &[&str] = &[
    "what", "which", "who", "whom", "whose", "when", "where", "why", "how", "can", "could",
    "would", "will", "should", "shall", "may", "might", "is", "are", "am", "was", "were", "do",
    "does", "did", "have", "has", "tell", "show", "give", "list", "explain", "describe", "find",
    "calculate", "compute", "estimate", "compare", "help", "please", "qué", "que", "cómo",
    "como", "cuánto", "cuanto", "cuál", "cual", "quién", "dónde", "quel", "quelle", "combien",
    "comment", "pourquoi", "où", "est-ce",
];

/// Question words that mark a request wherever they appear ("so what is...").
const QUESTION_WORDS: &[&str] = &[
    "what", "which", "who", "whom", "whose", "when", "where", "why", "how", "qué", "cómo",
    "cuánto", "cuánta", "cuál", "quién", "dónde", "combien", "pourquoi", "où",
];

const REQUEST_MARKERS: &[&str] = &[
    "i need",
    "i want",
    "i'd like",
    "i would like",
    "can you",
    "could you",
    "would you",
    "please",
    "let me know",
    "necesito",
    "quiero",
    "je veux",
    "j'ai besoin",
];

/// First-person openers of a declarative sentence ("we are...", "our budget...").
const FIRST_PERSON: &[&str] = &[
    "i", "i'm", "i've", "i'll", "we", "we're", "we've", "we'll", "my", "our", "yo", "mi", "mis",
    "nosotros", "nuestro", "nuestra", "nuestros", "je", "j'ai", "nous", "mon", "ma", "mes",
    "notre", "nos",
];

/// Finite verbs that make a sentence out of a noun phrase.
const FINITE_VERBS: &[&str] = &[
    "is", "are", "am", "was", "were", "has", "have", "had", "will", "won't", "isn't", "aren't",
    "wasn't", "don't", "doesn't", "didn't", "can't", "es", "son", "está", "están", "fue",
    "tengo", "tenemos", "tiene", "est", "sont", "suis", "sommes", "était", "ai", "avons",
];

/// Whether the input is a plain declarative statement ("Our budget is 400
/// million.") rather than a question or request.
///
/// A statement has no question mark, no question word anywhere, no request
/// phrasing, and a verb: either a first-person opener or a finite verb. A
/// bare noun phrase ("office dog name") is treated as a request.
#[must_use]
pub fn is_informational_statement(text: &str) -> bool {
    let normalized = normalize(text).replace('\u{2019}', "'");
    if normalized.is_empty() || normalized.contains('?') || normalized.contains('¿') {
        return false;
    }
    if REQUEST_MARKERS.iter().any(|marker| normalized.contains(marker)) {
        return false;
    }

    let words: Vec<&str> = normalized
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '\''))
        .filter(|w| !w.is_empty())
        .collect();
    let Some(first) = words.first() else {
        return false;
    };
    if LEADING_INTERROGATIVES.contains(first) || words.iter().any(|w| QUESTION_WORDS.contains(w)) {
        return false;
    }

    let first_person = words.len() > 1 && FIRST_PERSON.contains(first);
    first_person || words.iter().any(|w| FINITE_VERBS.contains(w))
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
