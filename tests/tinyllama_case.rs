use chatjinja::{render_chat_template, render_chat_template_with_context, ChatMessage, RenderContext};
use rstest::rstest;

const TINYLLAMA: &str = r#"
{% for message in messages %}
{% if message['role'] == 'user' %}
{{ '<|user|>\n' + message['content'] + eos_token }}
{% elif message['role'] == 'system' %}
{{ '<|system|>\n' + message['content'] + eos_token }}
{% elif message['role'] == 'assistant' %}
{{ '<|assistant|>\n'  + message['content'] + eos_token }}
{% endif %}
{% if loop.last and add_generation_prompt %}
{{ '<|assistant|>' }}
{% endif %}
{% endfor %}
"#;

fn greeting() -> Vec<ChatMessage> {
    vec![
        ChatMessage::new("system", "You are a friendly AI."),
        ChatMessage::new("user", "Hello!"),
    ]
}

fn context(eos_token: &str, add_generation_prompt: bool) -> RenderContext {
    let mut ctx = RenderContext::new();
    ctx.set_var("eos_token", eos_token)
        .set_flag("add_generation_prompt", add_generation_prompt);
    ctx
}

#[test]
fn default_context_adds_generation_prompt() {
    // eos_token="</s>", add_generation_prompt=true
    let rendered = render_chat_template(TINYLLAMA.trim(), &greeting()).unwrap();
    assert_eq!(
        rendered.trim(),
        "<|system|>\nYou are a friendly AI.</s>\n<|user|>\nHello!</s>\n<|assistant|>"
    );
}

#[rstest]
#[case::with_prompt(true, "<|system|>\nYou are a friendly AI.</s>\n<|user|>\nHello!</s>\n<|assistant|>\n")]
#[case::without_prompt(false, "<|system|>\nYou are a friendly AI.</s>\n<|user|>\nHello!</s>\n")]
fn generation_prompt_flag(#[case] add_generation_prompt: bool, #[case] expected: &str) {
    let rendered = render_chat_template_with_context(
        TINYLLAMA.trim(),
        &greeting(),
        &context("</s>", add_generation_prompt),
    )
    .unwrap();
    assert_eq!(rendered, expected);
}

#[rstest]
#[case("</s>")]
#[case("<|endoftext|>")]
#[case("")]
fn custom_eos_token(#[case] eos: &str) {
    let rendered = render_chat_template_with_context(
        "{% for message in messages %}{{ message['content'] + eos_token }}{% endfor %}",
        &[ChatMessage::new("user", "Hello")],
        &context(eos, false),
    )
    .unwrap();
    assert_eq!(rendered, format!("Hello{}", eos));
}

#[test]
fn multi_turn_conversation() {
    let messages = vec![
        ChatMessage::new("system", "You help."),
        ChatMessage::new("user", "What is 2+2?"),
        ChatMessage::new("assistant", "4"),
        ChatMessage::new("user", "Thanks!"),
    ];
    let rendered =
        render_chat_template_with_context(TINYLLAMA.trim(), &messages, &context("</s>", true)).unwrap();

    assert_eq!(
        rendered,
        concat!(
            "<|system|>\nYou help.</s>\n",
            "<|user|>\nWhat is 2+2?</s>\n",
            "<|assistant|>\n4</s>\n",
            "<|user|>\nThanks!</s>\n",
            "<|assistant|>\n",
        )
    );
}

#[test]
fn missing_eos_token_is_an_error() {
    // `'...' + undefined` cannot be evaluated
    let mut ctx = RenderContext::new();
    ctx.set_flag("add_generation_prompt", false);
    let err = render_chat_template_with_context(TINYLLAMA.trim(), &greeting(), &ctx).unwrap_err();
    assert_eq!(err.message(), "Cannot perform operation + on undefined values");
}
