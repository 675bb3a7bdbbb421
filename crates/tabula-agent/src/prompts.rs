//! Prompt templates and the parsing contract for each response.
//!
//! Every template is a pure function returning the system/user message pair;
//! every parser is a pure function of the response text.

use regex::Regex;
use std::sync::LazyLock;
use tabula_core::{ChatMessage, DatasetKind, FunctionDefinition, Plan, Table, ToolDefinition};
use tabula_routine::{LANGUAGE_GUIDE, Routine};

/// Description attached to every parameter of a resolution candidate.
pub const PARAMETER_DESCRIPTION: &str =
    "the thing the user wants to query, e.g. a person's name or a city";

pub const RESOLUTION_DESCRIPTION: &str = "Use this function to answer the user's question.";

fn pair(system: &str, user: String) -> Vec<ChatMessage> {
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

// ── Plan generation ────────────────────────────────────────────────────

const PLAN_SYSTEM: &str = "You are an expert plan generation assistant.";

const PLAN_INSTRUCTIONS: &str = r#"You are given a question over a table. Your task is to generate a plan by decomposing the question into a series of clear, non-overlapping sub-questions, so that answering each sub-question in order will allow you to answer the original question comprehensively. If no decomposition is needed, just return the original question.

If an old plan is provided, you must:
- Carefully review the old plan.
- Identify any missing aspects, vague steps, redundancies, or logic gaps.
- Revise and improve the plan, making it more complete, clear, and logically ordered.
- Ensure the new plan covers all key elements of the original question, fixes old plan issues, and is at least as good as, and preferably better than, the old plan.
- If the old plan is already perfect, you may keep it, but strive for any possible improvement.

**Output only the improved plan in a numbered list (1. 2. 3. ...), without explanations and any other words above or below the plan.**

Examples:

Example 1:
Question: Which country has won the OGAE Video Contest multiple times, and what were the corresponding years, winning songs and points scored?

Old Plan:
1. Which country has won the OGAE Video Contest multiple times?
2. What were the corresponding years of these victories?

Improved Plan:
1. Which country has won the OGAE Video Contest multiple times?
2. What were the corresponding years of these victories?
3. What were the winning songs for each of these years?
4. What were the points scored in each of these victories?

Example 2:
Question: Who won the 2019 contest and what was their score?

Old Plan:
1. Who won the 2019 contest?

Improved Plan:
1. Who won the 2019 contest?
2. What was their score?

Now, please generate a plan for the following question. If an old plan is present, improve upon it as described."#;

pub fn plan_generation(query: &str, old_plan: Option<&Plan>) -> Vec<ChatMessage> {
    let old = old_plan.map_or_else(|| "None".to_string(), Plan::render_numbered);
    pair(
        PLAN_SYSTEM,
        format!("{PLAN_INSTRUCTIONS}\n\nQuestion: '''{query}'''\nOld Plan: '''{old}'''\n"),
    )
}

static NUMBER_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+[.)]\s*").expect("valid numbering regex"));
static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+\s*[.):]|[-*•])\s*").expect("valid list marker regex")
});

/// Reads a numbered list into a plan. Headings such as `Improved Plan:` and
/// blank lines are dropped; `None` when nothing usable remains.
pub fn parse_plan(text: &str) -> Option<Plan> {
    let body = text.replace("Improved Plan:", "\n");
    let lines: Vec<String> = if body.trim().contains('\n') {
        body.lines().map(str::to_string).collect()
    } else {
        NUMBER_SPLIT.split(&body).map(str::to_string).collect()
    };
    let questions = lines
        .iter()
        .map(|line| LIST_MARKER.replace(line.trim(), "").trim().to_string())
        .filter(|line| !line.is_empty())
        .filter(|line| !is_heading(line));
    Plan::new(questions)
}

fn is_heading(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    line.ends_with(':') && (lower.contains("plan") || lower.contains("sub-questions"))
}

// ── Plan check ─────────────────────────────────────────────────────────

const CHECK_SYSTEM: &str = "You are an expert in iterative plan checking.";

const CHECK_INSTRUCTIONS: &str = r#"Given a complex question over a table and a set of decomposed sub-questions, your task is to check whether the sub-questions are informative enough to answer the complex question.

You do NOT need to be extremely strict. As long as the sub-questions can reasonably lead to an answer that covers all the main requirements of the original question, you should return YES. Minor omissions or lack of extreme detail are acceptable, as long as the main aspects are covered.

If the plan is sufficient to answer the question, respond with YES and stop revising. Otherwise, respond with NO.

Example 1:
Question: Which country has won the OGAE Video Contest multiple times, and what were the corresponding years, winning songs and points scored?
Sub-questions:
1. Which country has won the OGAE Video Contest multiple times?
2. What were the corresponding years of these victories?
3. What were the winning songs for each of these years?
4. What were the points scored in each of these victories?

Response: YES

Example 2:
Question: Which country has won the OGAE Video Contest multiple times, and what were the corresponding years, winning songs and points scored?
Sub-questions:
1. Which country has won the OGAE Video Contest multiple times?
2. What were the corresponding years of these victories?

Response: NO

Now, please answer for the following:"#;

pub fn check_plan(query: &str, plan: &Plan) -> Vec<ChatMessage> {
    pair(
        CHECK_SYSTEM,
        format!(
            "{CHECK_INSTRUCTIONS}\nQuestion: '''{query}'''\nSub-questions: '''\n{}\n'''\n\nYour response (just YES or NO):",
            plan.render_numbered()
        ),
    )
}

/// Sufficient iff the reply contains `YES` in any case.
pub fn parse_check(text: &str) -> bool {
    text.to_uppercase().contains("YES")
}

// ── Routine generation and repair ──────────────────────────────────────

const ROUTINE_SYSTEM: &str =
    "You are an expert programmer who writes small routines that extract structured data from tables.";

const ROUTINE_EXAMPLES: &str = r#"---
**Example 1 (Extracting specific details from several rows):**
Question: What TV shows was Shagun Sharma seen in 2019?
Table Header: ["Year", "Title", "Role"]
Table Rows: [["2019", "Laal Ishq", "Pernia"], ["2019", "Vikram Betaal Ki Rahasya Gatha", "Rukmani"], ...]

**Correct Routine (returns a list of maps):**
```routine
routine get_shagun_sharma_roles_2019(table) {
    let results = [];
    for row in table.rows {
        if row["Year"] == "2019" {
            push(results, {"Title": row["Title"], "Role": row["Role"]});
        }
    }
    if len(results) > 0 {
        return results;
    }
    return none;
}
```
*(This returns: [{"Title":"Laal Ishq","Role":"Pernia"}, ...])*

---
**Example 2 (A parameter resolved from the question):**
Question: Who was the driver of the car number 23 in the 2008 Nascar Craftsman Truck Series?
Table Header: ["Rank", "No.", "Driver", "Team", "Laps", "Status"]
Table Rows: [["1", "23", "Johnny Benson", "Bill Davis Racing", "200", "Running"], ...]

**Correct Routine (returns a map):**
```routine
routine get_nascar_driver_details(table, car_number) {
    for row in table.rows {
        if row["No."] == car_number {
            return {"Driver": row["Driver"], "Team": row["Team"]};
        }
    }
    return none;
}
```
*(Called with car_number = "23", this returns: {"Driver":"Johnny Benson","Team":"Bill Davis Racing"})*
---"#;

pub fn routine_generation(sub_question: &str, table: &Table) -> Vec<ChatMessage> {
    pair(
        ROUTINE_SYSTEM,
        format!(
            r#"Your task is to write a routine that answers a question by extracting ALL relevant information from the provided table.

**CRITICAL INSTRUCTIONS:**
1.  **Goal:** Find the relevant row(s) and extract data from ALL columns that are needed to fully answer the question.
2.  **Output Format:** The routine **MUST** return a map from column headers to cell values, or a list of such maps when several rows are relevant.
3.  **Parameters:** The first parameter is `table`. Add one extra parameter for each entity from the question that the routine filters on (a name, a number, a year).
4.  **No Answer Found:** If no relevant information is found, `return none;`.
5.  **Delimiter:** Put the routine in a single ```routine fenced block.

{LANGUAGE_GUIDE}

{ROUTINE_EXAMPLES}
Now, write a routine that follows these instructions precisely.

**Question:** '''{sub_question}'''
**Table Title:** '''{}'''
**Table Header:** '''{}'''
**Table Rows:** '''{}'''
"#,
            table.title,
            serde_json::to_string(&table.header).unwrap_or_default(),
            serde_json::to_string(&table.rows).unwrap_or_default(),
        ),
    )
}

const REPAIR_SYSTEM: &str = "You are an expert in debugging table routines.";

pub fn routine_repair(
    sub_question: &str,
    table: &Table,
    routine_source: &str,
    feedback: &str,
) -> Vec<ChatMessage> {
    pair(
        REPAIR_SYSTEM,
        format!(
            r#"The routine below failed. Fix it using the Feedback so that it runs without error on the given table and answers the question. Keep the `table` parameter. Answer with the corrected routine only, in a single ```routine fenced block.

{LANGUAGE_GUIDE}

The following is the question:'''{sub_question}'''
The following is the routine:
'''
{routine_source}
'''
The following is the table:
'''
{}
'''
The following is the Feedback:'''{feedback}'''"#,
            table.render_for_prompt()
        ),
    )
}

static ROUTINE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```routine[ \t]*\r?\n(.*?)\r?\n[ \t]*```").expect("valid routine fence regex")
});
static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)\r?\n[ \t]*```").expect("valid fence regex")
});

/// Pulls routine source out of a prose-wrapped reply: a ```` ```routine ````
/// block first, then any fenced block, else the text with stray fence
/// markers removed.
pub fn extract_routine_source(response: &str) -> String {
    if let Some(caps) = ROUTINE_FENCE.captures(response) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = ANY_FENCE.captures(response) {
        return caps[1].trim().to_string();
    }
    response
        .replace("```routine", "")
        .replace("```", "")
        .trim()
        .to_string()
}

// ── Argument resolution ────────────────────────────────────────────────

/// The routine as the single callable offered for argument resolution.
pub fn resolution_tool(routine: &Routine) -> ToolDefinition {
    let extras = routine.extra_params();
    let mut properties = serde_json::Map::new();
    for name in &extras {
        properties.insert(
            (*name).to_string(),
            serde_json::json!({"type": "string", "description": PARAMETER_DESCRIPTION}),
        );
    }
    ToolDefinition::function(FunctionDefinition {
        name: routine.name().to_string(),
        description: RESOLUTION_DESCRIPTION.to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": extras,
            "additionalProperties": false,
        }),
    })
}

pub fn resolution_messages(sub_question: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(sub_question)]
}

// ── Direct answer ──────────────────────────────────────────────────────

const DIRECT_SYSTEM: &str =
    "You are an expert in answering questions directly according to the given table.";

pub fn ask_directly(question: &str, table: &Table) -> Vec<ChatMessage> {
    pair(
        DIRECT_SYSTEM,
        format!(
            r#"Answer the question according to the given table. Give your short-form answer directly, no other words.

Example:
Question: Which team is the first?
Table:
    Header: ["Rank", "Cyclist", "Team", "Time", "UCI ProTour Points"]
    Rows: [["1", "Alejandro Valverde (ESP)", "Caisse d'Epargne", "5h 29' 10\"", "40"]]

Response:
    Caisse d'Epargne

Now please give your short-form answer to the given question. Let's follow templates of examples.
The following is the question:'''{question}'''
The following is the table:'''
{}
'''"#,
            table.render_for_prompt()
        ),
    )
}

// ── Sentence synthesis ─────────────────────────────────────────────────

const SENTENCE_SYSTEM: &str = "You are an expert in generating natural language sentences from structured data, adapting your style to the context.";

pub fn to_sentence(short_answer: &str, sub_question: &str) -> Vec<ChatMessage> {
    pair(
        SENTENCE_SYSTEM,
        format!(
            r#"Your task is to convert the structured 'Data' into a single, high-quality, factual sentence that answers the 'Question'.
The style of the sentence should mimic the provided examples.

**INSTRUCTIONS:**
1.  Carefully analyze the 'Data' (a map, a list of maps, or a short text answer).
2.  Synthesize all information from the 'Data' into a flowing, natural sentence.
3.  Ensure the sentence directly and completely answers the 'Question'.
4.  Do not add information not present in the 'Data'.

---
**Example 1 (Concise & Detail-Oriented):**
Question: What TV shows was Shagun Sharma seen in 2019?
Data: `[{{"Title":"Laal Ishq","Role":"Pernia"}},{{"Title":"Vikram Betaal Ki Rahasya Gatha","Role":"Rukmani"}},{{"Title":"Shaadi Ke Siyape","Role":"Dua"}}]`

**Generated Sentence:**
In 2019, Shagun Sharma appeared in Laal Ishq as Pernia, Vikram Betaal Ki Rahasya Gatha as Rukmani, and Shaadi Ke Siyape as Dua.

---
**Example 2 (More Descriptive Summary):**
Question: Who was the driver of the car number 23 in the 2008 Nascar Craftsman Truck Series?
Data: `{{"Driver":"Johnny Benson","Team":"Bill Davis Racing"}}`

**Generated Sentence:**
The driver of car number 23 in the 2008 Nascar Craftsman Truck Series was Johnny Benson, who drove for Bill Davis Racing.

---
Now, generate the sentence based on the following inputs.

**Question:** '''{sub_question}'''
**Data:** '''{short_answer}'''
"#
        ),
    )
}

// ── Final synthesis ────────────────────────────────────────────────────

const FETAQA_SYSTEM: &str =
    "You are an expert answer generator that produces concise, direct answers.";

const FETAQA_GUIDE: &str = r#"You will be given a main 'Question' and a 'Fact List'. Your task is to synthesize these facts into a final, concise answer.

**STYLE GUIDE:**
Generate a direct, concise answer in one sentence. Be factual and to the point, avoiding unnecessary elaboration.

**Examples:**
Question: Who won the 1982 Illinois gubernatorial election, and how many votes was the margin?
Answer: Thompson prevailed in the 1982 Illinois gubernatorial election by a 5,074 vote margin.

Question: How did Michael and Mario Andretti do?
Answer: Michael Andretti finished with a run of 214.522 mph, faster than Mario.

Question: How many copies did "Pleasure" sell in 1998 alone, and how long was it the best selling album in Japan?
Answer: B'z The Best "Pleasure" sold more than 5 million copies in 1998 alone, making it a temporary best-selling album in Japanese music history, until being surpassed by Utada Hikaru's First Love in 1999.

Question: When and in what play did Platt appear at the Music Box Theatre?
Answer: In 2016 and 2017, Platt played in Dear Evan Hansen on Broadway at the Music Box Theatre.

**Universal Rule:** NEVER invent information. Your answer MUST be grounded exclusively in the provided 'Fact List'."#;

const QTSUMM_SYSTEM: &str =
    "You are an expert summary generator that produces comprehensive, flowing summaries.";

const QTSUMM_GUIDE: &str = r#"You will be given a main 'Query' and a 'Fact List'. Your task is to synthesize these facts into a final, comprehensive summary.

**STYLE GUIDE:**
Generate a well-structured, flowing paragraph (50-60 words) that comprehensively addresses the query. Use connecting words and phrases to create coherent, readable text.

**Examples:**
Query: Summarize the basic information of the episodes of Dragon Zakura aired in July.
Summary: The Dragon Zakura TV series aired multiple episodes in July 2005. The first episode of July titled "Know Your Weaknesses!" had a rating of 16.5%, while the following two episodes had ratings of 13.8% and 16.1%. The second episode of the month was titled "Entrance Exams Are Sports , So Play!". The last episode was named "Hold Out Until You Hit The Wall".

Query: Did any athlete from the United States participate in the Women's 50 metre freestyle final at the 2012 Summer Olympics, and if so, what was her rank and final time?
Summary: Yes, an athlete from the United States participated in the Women's 50 metre freestyle final at the 2012 Summer Olympics-Jessica Hardy. She finished with a rank of 7th place with a final time of 24.62 seconds.

**Universal Rule:** NEVER invent information. Your summary MUST be grounded exclusively in the provided 'Fact List'."#;

pub fn final_answer(kind: DatasetKind, query: &str, facts: &[String]) -> Vec<ChatMessage> {
    let fact_list = serde_json::to_string(facts).unwrap_or_default();
    match kind {
        DatasetKind::FeTaQA => pair(
            FETAQA_SYSTEM,
            format!("{FETAQA_GUIDE}\n\n**Question:** '''{query}'''\n**Fact List:** '''{fact_list}'''\n"),
        ),
        DatasetKind::QTSumm => pair(
            QTSUMM_SYSTEM,
            format!("{QTSUMM_GUIDE}\n\n**Query:** '''{query}'''\n**Fact List:** '''{fact_list}'''\n"),
        ),
    }
}
