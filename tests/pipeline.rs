use std::cell::RefCell;

use llmodel::inference::{ScriptStep, ScriptedEngine, PROMPT_TOO_LONG_TOKEN};
use llmodel::{
    build_prompt, ChatTurn, Continuation, GenerationConfig, GenerationError, LlModel,
    StreamingAdapter,
};

const BLOCK: &str = "### Instruction: \nThe prompt below is a question to answer, a task to complete, or a conversation to respond to; decide which and write an appropriate response.\n### Prompt: ";

fn bytewise_engine(text: &str) -> ScriptedEngine {
    let steps = text
        .bytes()
        .zip(1..)
        .map(|(b, id)| ScriptStep::token(id, [b]))
        .collect();
    ScriptedEngine::new(steps)
}

#[test]
fn test_one_byte_per_token_matches_whole_text() {
    let text = "Grüße, 世界! 🦀🎉";
    let fragments = RefCell::new(Vec::new());

    let mut model = LlModel::new(bytewise_engine(text), "bytes.gguf");
    let adapter =
        StreamingAdapter::new().with_echo(|f: &str| fragments.borrow_mut().push(f.to_string()));
    let result = model
        .generate_with("go", &GenerationConfig::default(), adapter)
        .unwrap();

    assert_eq!(result.text, text);
    assert_eq!(result.echoed.as_deref(), Some(text));
    assert_eq!(fragments.borrow().concat(), text);
    // every fragment is a whole code point
    assert!(fragments.borrow().iter().all(|f| f.chars().count() == 1));
}

#[test]
fn test_sentinel_raises_prompt_too_long_and_discards_output() {
    let engine = ScriptedEngine::new(vec![
        ScriptStep::token(1, "leaked"),
        ScriptStep::token(PROMPT_TOO_LONG_TOKEN, "context exceeded"),
    ]);
    let mut model = LlModel::new(engine, "m.gguf");

    match model.generate("x", &GenerationConfig::default(), false) {
        Err(GenerationError::PromptTooLong(message)) => assert_eq!(message, "context exceeded"),
        other => panic!("expected PromptTooLong, got {:?}", other),
    }
}

#[test]
fn test_unterminated_response_fails_fast() {
    let engine = ScriptedEngine::new(vec![
        ScriptStep::Raw {
            id: 1,
            bytes: b"no terminator".to_vec(),
        },
        ScriptStep::token(2, "never seen"),
    ]);
    let mut model = LlModel::new(engine, "m.gguf");

    assert!(matches!(
        model.generate("x", &GenerationConfig::default(), false),
        Err(GenerationError::ProtocolViolation(_))
    ));
}

#[test]
fn test_stop_on_third_response_keeps_first_two_tokens() {
    let engine = ScriptedEngine::from_fragments(&["first ", "second ", "third ", "fourth"]);
    let mut model = LlModel::new(engine, "m.gguf");

    let mut calls = 0;
    let adapter = StreamingAdapter::new().with_response_hook(|_, _| {
        calls += 1;
        Continuation::from(calls != 3)
    });
    let result = model
        .generate_with("x", &GenerationConfig::default(), adapter)
        .unwrap();

    assert_eq!(result.text, "first second ");
    assert_eq!(calls, 3);
}

#[test]
fn test_recalculation_does_not_interrupt_by_default() {
    let engine = ScriptedEngine::new(vec![
        ScriptStep::token(1, "before "),
        ScriptStep::Recalculate,
        ScriptStep::token(2, "after"),
    ]);
    let mut model = LlModel::new(engine, "m.gguf");

    let text = model
        .generate("x", &GenerationConfig::default(), false)
        .unwrap();
    assert_eq!(text, "before after");
}

#[test]
fn test_recalculation_hook_can_stop() {
    let engine = ScriptedEngine::new(vec![
        ScriptStep::token(1, "before "),
        ScriptStep::Recalculate,
        ScriptStep::token(2, "after"),
    ]);
    let mut model = LlModel::new(engine, "m.gguf");

    let mut events = Vec::new();
    let adapter = StreamingAdapter::new().with_recalculate_hook(|recalculating| {
        events.push(recalculating);
        Continuation::Stop
    });
    let result = model
        .generate_with("x", &GenerationConfig::default(), adapter)
        .unwrap();

    assert_eq!(result.text, "before ");
    assert_eq!(events, vec![true]);
}

fn split_euro_engine() -> ScriptedEngine {
    let euro = "€".as_bytes();
    ScriptedEngine::new(vec![
        ScriptStep::token(1, "x"),
        ScriptStep::token(2, &euro[..2]),
        ScriptStep::Recalculate,
        ScriptStep::token(3, &euro[2..]),
    ])
}

#[test]
fn test_recalculation_stop_mid_code_point_drops_tail() {
    let mut model = LlModel::new(split_euro_engine(), "m.gguf");

    let adapter = StreamingAdapter::new().with_recalculate_hook(|_| Continuation::Stop);
    let result = model
        .generate_with("x", &GenerationConfig::default(), adapter)
        .unwrap();

    assert_eq!(result.text, "x");
    assert_eq!(result.tokens, 2);
}

#[test]
fn test_recalculation_stop_mid_code_point_with_echo() {
    let fragments = RefCell::new(Vec::new());
    let mut model = LlModel::new(split_euro_engine(), "m.gguf");

    let adapter = StreamingAdapter::new()
        .with_echo(|f: &str| fragments.borrow_mut().push(f.to_string()))
        .with_recalculate_hook(|_| Continuation::Stop);
    let result = model
        .generate_with("x", &GenerationConfig::default(), adapter)
        .unwrap();

    assert_eq!(result.text, "x");
    assert_eq!(result.echoed.as_deref(), Some("x"));
    assert_eq!(fragments.borrow().concat(), "x");
}

#[test]
fn test_token_hook_sees_prompt_tokens() {
    let mut model = LlModel::new(ScriptedEngine::from_fragments(&["ok"]), "m.gguf");

    let mut seen = Vec::new();
    let adapter = StreamingAdapter::new().with_token_hook(|id| {
        seen.push(id);
        Continuation::Continue
    });
    model
        .generate_with("three word prompt", &GenerationConfig::default(), adapter)
        .unwrap();

    assert_eq!(seen, vec![0, 1, 2]);
}

#[test]
fn test_chat_completion_end_to_end() {
    let mut model = LlModel::new(ScriptedEngine::from_fragments(&["Hello", "."]), "orca.gguf");
    let turns = [ChatTurn::system("Be terse."), ChatTurn::user("Hi")];

    let response = model
        .chat_completion(&turns, &GenerationConfig::default(), false, false)
        .unwrap();

    let prompt = format!("Be terse.\n{}\nHi\n### Response:", BLOCK);
    assert_eq!(build_prompt(&turns), prompt);
    assert_eq!(model.engine().prompts(), [prompt.clone()]);

    assert_eq!(response.model, "orca.gguf");
    assert_eq!(response.content(), "Hello.");
    assert_eq!(response.usage.prompt_tokens, prompt.chars().count());
    assert_eq!(response.usage.completion_tokens, 6);
    assert_eq!(response.usage.total_tokens, prompt.chars().count() + 6);
}

#[test]
fn test_chat_completion_prompt_too_long() {
    let mut model = LlModel::new(ScriptedEngine::from_fragments(&["unused"]), "m.gguf");
    let config = GenerationConfig::builder().with_n_ctx(8).build();

    let result = model.chat_completion(&[ChatTurn::user("Hi")], &config, false, false);
    assert!(matches!(result, Err(GenerationError::PromptTooLong(_))));
}
