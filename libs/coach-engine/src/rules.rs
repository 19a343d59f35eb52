//! Ordered rule table for pattern classification.
//!
//! **Precedence:** a rule's priority is its position in the table and the
//! first match wins, so specific categories must sit above broader
//! substring matches that would also accept them.
//!
//! **Confidence:** each rule carries a fixed, hand-picked confidence. These
//! are tunable constants, not computed values; every one of them must stay
//! above [`GENERIC_CONFIDENCE`].

use coach_common::types::{ErrorCategory, Explanation, ExplanationSource, TimeoutKind};

/// Confidence of the catch-all explanation used when no rule matches
pub const GENERIC_CONFIDENCE: f64 = 0.5;

/// Failure text as seen by rule predicates and builders
#[derive(Debug, Clone, Copy)]
pub struct FailureText<'a> {
    pub raw: &'a str,
    /// Lower-cased `raw`
    pub normalized: &'a str,
    pub timeout_kind: TimeoutKind,
}

impl<'a> FailureText<'a> {
    fn mentions(&self, needle: &str) -> bool {
        self.normalized.contains(needle)
    }

    /// First single-quoted token in the raw text, e.g. the `x` in
    /// `NameError: name 'x' is not defined`
    fn quoted(&self) -> Option<&'a str> {
        let start = self.raw.find('\'')? + 1;
        let len = self.raw[start..].find('\'')?;
        Some(&self.raw[start..start + len])
    }
}

/// The text parts of an explanation, before source and confidence are attached
#[derive(Debug, Clone, PartialEq)]
pub struct ExplanationBody {
    pub summary: String,
    pub why_it_happened: String,
    pub how_to_fix: Vec<String>,
    pub corrected_example: Option<String>,
}

impl ExplanationBody {
    fn new(summary: impl Into<String>, why: impl Into<String>, fixes: &[&str], example: Option<&str>) -> Self {
        Self {
            summary: summary.into(),
            why_it_happened: why.into(),
            how_to_fix: fixes.iter().map(|f| f.to_string()).collect(),
            corrected_example: example.map(str::to_string),
        }
    }
}

pub type Matcher = fn(&FailureText<'_>) -> bool;
pub type Builder = fn(&FailureText<'_>) -> ExplanationBody;

pub struct ErrorRule {
    pub category: ErrorCategory,
    pub confidence: f64,
    matcher: Matcher,
    builder: Builder,
}

impl ErrorRule {
    pub fn new(category: ErrorCategory, confidence: f64, matcher: Matcher, builder: Builder) -> Self {
        Self {
            category,
            confidence: confidence.clamp(0.0, 1.0),
            matcher,
            builder,
        }
    }

    pub fn matches(&self, failure: &FailureText<'_>) -> bool {
        (self.matcher)(failure)
    }

    pub fn explain(&self, failure: &FailureText<'_>) -> Explanation {
        let body = (self.builder)(failure);
        Explanation {
            summary: body.summary,
            why_it_happened: body.why_it_happened,
            how_to_fix: body.how_to_fix,
            corrected_example: body.corrected_example,
            confidence: self.confidence,
            source: ExplanationSource::Pattern,
            category: Some(self.category),
        }
    }
}

impl std::fmt::Debug for ErrorRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRule")
            .field("category", &self.category)
            .field("confidence", &self.confidence)
            .finish()
    }
}

/// Immutable once built; shared behind an `Arc`
#[derive(Debug)]
pub struct RuleTable {
    rules: Vec<ErrorRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<ErrorRule>) -> Self {
        Self { rules }
    }

    /// Insert a rule at `priority` (0 = checked first) while building a table
    pub fn with_rule_at(mut self, priority: usize, rule: ErrorRule) -> Self {
        let index = priority.min(self.rules.len());
        self.rules.insert(index, rule);
        self
    }

    pub fn first_match(&self, failure: &FailureText<'_>) -> Option<&ErrorRule> {
        self.rules.iter().find(|rule| rule.matches(failure))
    }

    /// Rules in priority order
    pub fn iter(&self) -> impl Iterator<Item = &ErrorRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ErrorRule::new(ErrorCategory::Timeout, 0.95, |f| f.timeout_kind.is_timeout(), explain_timeout),
            ErrorRule::new(
                ErrorCategory::NameReference,
                0.95,
                |f| f.mentions("nameerror") || f.mentions("unboundlocalerror"),
                explain_name_reference,
            ),
            ErrorRule::new(
                ErrorCategory::DivisionByZero,
                0.95,
                |f| f.mentions("zerodivisionerror"),
                explain_division_by_zero,
            ),
            ErrorRule::new(
                ErrorCategory::Indentation,
                0.90,
                |f| f.mentions("indentationerror") || f.mentions("taberror"),
                explain_indentation,
            ),
            ErrorRule::new(ErrorCategory::Syntax, 0.85, |f| f.mentions("syntaxerror"), explain_syntax),
            ErrorRule::new(ErrorCategory::MissingInput, 0.90, |f| f.mentions("eoferror"), explain_missing_input),
            ErrorRule::new(
                ErrorCategory::MissingModule,
                0.90,
                |f| f.mentions("modulenotfounderror") || f.mentions("importerror"),
                explain_missing_module,
            ),
            ErrorRule::new(
                ErrorCategory::RecursionDepth,
                0.90,
                |f| f.mentions("recursionerror"),
                explain_recursion_depth,
            ),
            ErrorRule::new(
                ErrorCategory::IndexOutOfRange,
                0.85,
                |f| f.mentions("indexerror"),
                explain_index_out_of_range,
            ),
            ErrorRule::new(ErrorCategory::MissingKey, 0.85, |f| f.mentions("keyerror"), explain_missing_key),
            ErrorRule::new(ErrorCategory::TypeMismatch, 0.80, |f| f.mentions("typeerror"), explain_type_mismatch),
            ErrorRule::new(ErrorCategory::BadValue, 0.80, |f| f.mentions("valueerror"), explain_bad_value),
            ErrorRule::new(
                ErrorCategory::MissingAttribute,
                0.80,
                |f| f.mentions("attributeerror"),
                explain_missing_attribute,
            ),
        ])
    }
}

/// Catch-all explanation built straight from the raw text
pub fn generic_explanation(raw_error: &str) -> Explanation {
    let detail = raw_error.trim();
    let why_it_happened = if detail.is_empty() {
        "Python encountered a runtime problem.".to_string()
    } else {
        format!("Python encountered a runtime problem: {}", detail)
    };

    Explanation {
        summary: "Your code caused an error.".to_string(),
        why_it_happened,
        how_to_fix: vec![
            "Read the error message".to_string(),
            "Fix the issue and retry".to_string(),
        ],
        corrected_example: None,
        confidence: GENERIC_CONFIDENCE,
        source: ExplanationSource::Generic,
        category: None,
    }
}

fn explain_timeout(f: &FailureText<'_>) -> ExplanationBody {
    match f.timeout_kind {
        TimeoutKind::WaitingForInput => ExplanationBody::new(
            "Your code is waiting for user input.",
            "The program asks for input, but all of the provided input was used up before it finished.",
            &[
                "Add the expected input in the 'Program input' field before running",
                "Provide one line of input for every input() call",
                "Or remove input() calls if they are not required",
            ],
            Some("name = input()\nprint('Hello', name)"),
        ),
        _ => ExplanationBody::new(
            "Your code ran for too long and was stopped.",
            "The program was still computing when the time limit ran out, which usually means a loop never ends.",
            &[
                "Check that every loop has a condition that eventually becomes false",
                "Make sure loop variables change on each iteration",
                "Increase the timeout if the work is genuinely long-running",
            ],
            Some("count = 0\nwhile count < 10:\n    count += 1"),
        ),
    }
}

fn explain_name_reference(f: &FailureText<'_>) -> ExplanationBody {
    let why = match f.quoted() {
        Some(name) => format!("Python could not find a variable called '{}'.", name),
        None => "Python could not find the variable name.".to_string(),
    };
    ExplanationBody::new(
        "You used a variable before defining it.",
        why,
        &["Define the variable before using it", "Check spelling"],
        Some("x = 10\nprint(x)"),
    )
}

fn explain_division_by_zero(_: &FailureText<'_>) -> ExplanationBody {
    ExplanationBody::new(
        "You divided a number by zero.",
        "Division or modulo by zero is undefined.",
        &["Ensure the denominator is not zero"],
        Some("if y != 0:\n    print(x / y)"),
    )
}

fn explain_indentation(_: &FailureText<'_>) -> ExplanationBody {
    ExplanationBody::new(
        "The indentation of your code is inconsistent.",
        "Python uses indentation to group statements, and a block is indented incorrectly.",
        &[
            "Indent every line of a block by the same amount",
            "Use spaces instead of mixing tabs and spaces",
            "Add an indented body after lines ending with ':'",
        ],
        Some("if x > 0:\n    print(x)"),
    )
}

fn explain_syntax(_: &FailureText<'_>) -> ExplanationBody {
    ExplanationBody::new(
        "There is a syntax mistake in your code.",
        "Python could not parse the code.",
        &["Check brackets, colons, indentation"],
        None,
    )
}

fn explain_missing_input(_: &FailureText<'_>) -> ExplanationBody {
    ExplanationBody::new(
        "Your code asked for more input than was provided.",
        "input() reached the end of the provided input before it could read a line.",
        &[
            "Add one line in the 'Program input' field for every input() call",
            "Check how many times input() runs inside loops",
        ],
        Some("name = input()\nprint('Hello', name)"),
    )
}

fn explain_missing_module(f: &FailureText<'_>) -> ExplanationBody {
    let why = match f.quoted() {
        Some(module) => format!("Python could not import '{}'.", module),
        None => "Python could not import a module.".to_string(),
    };
    ExplanationBody::new(
        "You imported a module that is not available.",
        why,
        &[
            "Check the module name for typos",
            "Only the Python standard library is available here",
        ],
        Some("import math\nprint(math.sqrt(16))"),
    )
}

fn explain_recursion_depth(_: &FailureText<'_>) -> ExplanationBody {
    ExplanationBody::new(
        "A function called itself too many times.",
        "The recursion never reached a base case, so Python ran out of stack space.",
        &[
            "Add a base case that stops the recursion",
            "Make sure each recursive call moves closer to the base case",
        ],
        Some("def countdown(n):\n    if n == 0:\n        return\n    countdown(n - 1)"),
    )
}

fn explain_index_out_of_range(_: &FailureText<'_>) -> ExplanationBody {
    ExplanationBody::new(
        "You accessed a position that does not exist.",
        "The index is outside the valid range of the list or string.",
        &[
            "Remember that indexes start at 0 and end at len(items) - 1",
            "Check the length before indexing",
        ],
        Some("items = [1, 2, 3]\nif i < len(items):\n    print(items[i])"),
    )
}

fn explain_missing_key(f: &FailureText<'_>) -> ExplanationBody {
    let why = match f.quoted() {
        Some(key) => format!("The dictionary has no key '{}'.", key),
        None => "The dictionary does not contain the requested key.".to_string(),
    };
    ExplanationBody::new(
        "You looked up a key that is not in the dictionary.",
        why,
        &["Check the key spelling", "Use dict.get() to supply a default"],
        Some("ages = {'ada': 36}\nprint(ages.get('bob', 0))"),
    )
}

fn explain_type_mismatch(_: &FailureText<'_>) -> ExplanationBody {
    ExplanationBody::new(
        "You used a value of the wrong type.",
        "An operation received a type it does not support, such as adding text to a number.",
        &[
            "Convert values with int(), float() or str() before combining them",
            "Check the number of arguments passed to functions",
        ],
        Some("age = int(input())\nprint(age + 1)"),
    )
}

fn explain_bad_value(_: &FailureText<'_>) -> ExplanationBody {
    ExplanationBody::new(
        "A value had the right type but an invalid content.",
        "A conversion or function received a value it cannot handle, such as int('abc').",
        &[
            "Check the input values you provide",
            "Validate text before converting it to a number",
        ],
        Some("text = '42'\nif text.isdigit():\n    print(int(text))"),
    )
}

fn explain_missing_attribute(_: &FailureText<'_>) -> ExplanationBody {
    ExplanationBody::new(
        "You used an attribute or method that does not exist on this value.",
        "The object has no attribute with that name, often because the value is None or a different type.",
        &[
            "Check the spelling of the method or attribute",
            "Print type(value) to see what you are working with",
        ],
        None,
    )
}
