use crate::services::grading::schema::ERROR_TYPES;

use super::GradeEssayParams;

pub(crate) const DEFAULT_SYSTEM_PROMPT: &str = "You are an experienced English writing teacher \
grading a student's handwritten essay that was transcribed by OCR. Assess the writing fairly, \
explain mistakes so the student can learn from them, and answer with a single JSON object that \
follows the requested schema.";

pub(crate) const DEFAULT_RUBRIC: &str = "Score five dimensions from 0 to 20: grammar \
(accuracy and range of sentence structures), vocabulary (precision and variety of word choice), \
structure (introduction, paragraphing, conclusion), content (relevance and development of ideas) \
and coherence (transitions and logical flow). totalScore is the sum of the five dimensions.";

const ERROR_TYPE_NOTES: [(&str, &str); 10] = [
    ("grammar", "agreement, tense, fragments, run-on sentences, articles, prepositions"),
    ("vocabulary", "wrong word or word form, collocations, register"),
    ("structure", "paragraphing, thesis, introduction and conclusion"),
    ("content", "unsupported claims, off-topic or underdeveloped ideas"),
    ("coherence", "missing transitions, abrupt jumps between ideas"),
    ("spelling", "genuine misspellings, not OCR noise"),
    ("punctuation", "comma splices, missing full stops, apostrophes, quotation marks"),
    ("style", "awkward phrasing, wordiness, tone that does not fit"),
    ("clarity", "ambiguous statements, unclear pronoun references"),
    ("other", "anything that fits none of the above"),
];

pub(crate) fn build_system_prompt(base: Option<&str>, params: &GradeEssayParams) -> String {
    let mut lines = vec![base.unwrap_or(DEFAULT_SYSTEM_PROMPT).to_string()];
    if params.short_mode {
        lines.push("Short mode: keep output compact and concise.".to_string());
    }
    if params.strict_json {
        lines.push("Output must be valid JSON only.".to_string());
    }
    lines.join("\n")
}

fn json_section(strict_json: bool) -> String {
    if strict_json {
        [
            "STRICT JSON:",
            "- Reply with one JSON object and nothing else.",
            "- No markdown fences, no comments, no trailing commas.",
            "- Strings use double quotes; scores are numbers, never strings.",
            "- Do not add keys that are not in the schema.",
            "- When needRewrite=false leave out the rewrite key.",
        ]
        .join("\n")
    } else {
        "Reply with valid JSON only, using double quotes and no trailing commas.".to_string()
    }
}

fn limits_section(short_mode: bool) -> String {
    let (label, errors, suggestions, summary, steps, sample) = if short_mode {
        ("SHORT MODE LIMITS", 10, 3, 120, 3, 300)
    } else {
        ("STANDARD LIMITS", 60, 12, 300, 8, 1500)
    };
    format!(
        "{label}:\n- at most {errors} errors, most important first\n\
         - at most {suggestions} suggestions per tier\n\
         - summary up to {summary} characters\n\
         - at most {steps} nextSteps\n\
         - sampleEssay up to {sample} characters"
    )
}

fn scoring_section() -> String {
    [
        "SCORING:",
        "- grammar, vocabulary, structure, content and coherence are each scored 0-20.",
        "- handwritingClarity is optional and also 0-20.",
        "- totalScore is exactly the sum of the five dimensions (0-100).",
        "- Do not inflate scores.",
    ]
    .join("\n")
}

fn errors_section() -> String {
    let notes = ERROR_TYPE_NOTES
        .iter()
        .map(|(name, note)| format!("- {name}: {note}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "ERRORS:\n- Each error has type, message, original and suggestion; startIndex and \
         endIndex are optional character offsets.\n- type is one of: {}\n- message explains \
         why the text is wrong.\n- original quotes the OCR text exactly.\nError types:\n{notes}",
        ERROR_TYPES.join(", ")
    )
}

fn suggestions_section(low_only: bool) -> String {
    let tiers = if low_only {
        "Fill suggestions.low only. suggestions.mid and suggestions.high MUST be empty arrays []."
    } else {
        "Fill suggestions.low, suggestions.mid and suggestions.high as the essay needs."
    };
    format!(
        "SUGGESTIONS:\n- low: spelling, basic grammar, punctuation and word-form fixes.\n\
         - mid: paragraphing, transitions, sentence combining, clearer wording.\n\
         - high: stronger arguments, richer vocabulary, stylistic polish.\n{tiers}\n\
         - sampleEssay is a model essay on the same topic.\n\
         - summary names the main strengths and the main weaknesses.\n\
         - nextSteps are concrete actions the student can practise."
    )
}

const OCR_NOTE: &str = "OCR NOTE: the essay was handwritten and machine-transcribed. Ignore \
obvious recognition noise (for example \"1\" read instead of \"I\") but still report real \
writing mistakes.";

const KEY_ORDER: [&str; 6] = [
    "1) totalScore (number, 0-100)",
    "2) dimensionScores { grammar, vocabulary, structure, content, coherence, \
     optional handwritingClarity }",
    "3) errors: [{ type, message, original, suggestion, optional startIndex, endIndex }]",
    "4) suggestions: { low, mid, high, optional rewrite, sampleEssay }",
    "5) summary (string)",
    "6) nextSteps (array of strings)",
];

pub(crate) fn build_user_prompt(params: &GradeEssayParams) -> String {
    let mut sections = vec![
        json_section(params.strict_json),
        limits_section(params.short_mode),
        scoring_section(),
        errors_section(),
        suggestions_section(params.low_only),
        OCR_NOTE.to_string(),
    ];

    if !params.rubric.trim().is_empty() {
        sections.push(format!("RUBRIC:\n{}", params.rubric.trim()));
    }

    sections.push(format!("OUTPUT KEYS IN ORDER:\n{}", KEY_ORDER.join("\n")));
    sections.push(format!(
        "needRewrite={}. If false, omit the rewrite property.",
        params.need_rewrite
    ));
    sections.push(format!("--- OCR TEXT START ---\n{}\n--- OCR TEXT END ---", params.text));

    sections.join("\n\n")
}
