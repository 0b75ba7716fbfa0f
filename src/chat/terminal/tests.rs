use super::*;

fn render(outputs: &[Output]) -> (String, String) {
    console::set_colors_enabled(false);
    let mut renderer = Renderer::new(Vec::new(), Vec::new());
    for output in outputs {
        renderer.print(output).expect("should write output");
    }
    let (out, err) = renderer.into_inner();
    (
        String::from_utf8(out).expect("should be utf-8"),
        String::from_utf8(err).expect("should be utf-8"),
    )
}

#[test]
fn answer_is_prefixed_with_model() {
    let (out, err) = render(&[
        Output::InputPrompt,
        Output::AnswerStart("llama3".to_string()),
        Output::Answer("Hello".to_string()),
        Output::Answer(", world".to_string()),
        Output::AnswerEnd,
    ]);

    assert_eq!(out, "you: llm(llama3): Hello, world\n");
    assert!(err.is_empty());
}

#[test]
fn status_and_errors_go_to_stderr() {
    let (out, err) = render(&[
        Output::Status("thinking".to_string()),
        Output::Error("model refused".to_string()),
    ]);

    assert!(out.is_empty());
    assert_eq!(err, "thinking\nerror: model refused\n");
}

#[test]
fn models_mark_current() {
    let (out, _) = render(&[Output::Models {
        models: vec!["llama3".to_string(), "qwen3".to_string()],
        current: "qwen3".to_string(),
    }]);

    assert_eq!(out, "  llama3\n* qwen3\n");
}

#[test]
fn reasoning_is_written_inline() {
    console::set_colors_enabled(false);
    let mut renderer = Renderer::new(Vec::new(), Vec::new());
    renderer
        .print_reasoning("step one")
        .expect("should write reasoning");

    let (out, _) = renderer.into_inner();
    assert_eq!(String::from_utf8(out).expect("should be utf-8"), "step one");
}
