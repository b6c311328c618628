use chatjinja::{render_chat_template_with_context, ChatMessage, Error, RenderContext};
use rstest::rstest;

fn msg(role: &str, content: &str) -> ChatMessage {
    ChatMessage::new(role, content)
}

fn render(template: &str, messages: &[ChatMessage]) -> chatjinja::Result<String> {
    render_chat_template_with_context(template, messages, &RenderContext::new())
}

#[rstest]
#[case::empty_messages(
    "{% for message in messages %}{{ message.content }}{% endfor %}",
    vec![],
    ""
)]
#[case::plain_text("Hello, world!", vec![], "Hello, world!")]
#[case::dot_access(
    "{% for message in messages %}{{ message.role }}{% endfor %}",
    vec![msg("user", "hi")],
    "user"
)]
#[case::bracket_access(
    "{% for message in messages %}{{ message['role'] }}{% endfor %}",
    vec![msg("user", "hi")],
    "user"
)]
#[case::first_and_last_single(
    "{% for message in messages %}{% if loop.first %}F{% endif %}{% if loop.last %}L{% endif %}{% endfor %}",
    vec![msg("user", "x")],
    "FL"
)]
#[case::first_and_last_multiple(
    "{% for message in messages %}{% if loop.first %}[{% endif %}{{ message.role }}{% if loop.last %}]{% endif %}{% endfor %}",
    vec![msg("a", ""), msg("b", ""), msg("c", "")],
    "[abc]"
)]
#[case::or_condition(
    "{% for message in messages %}{% if message.role == 'user' or message.role == 'assistant' %}Y{% else %}N{% endif %}{% endfor %}",
    vec![msg("system", ""), msg("user", ""), msg("assistant", "")],
    "NYY"
)]
#[case::concat_chain(
    "{% for message in messages %}{{ 'A' + 'B' + 'C' + message.role + 'D' }}{% endfor %}",
    vec![msg("x", "")],
    "ABCxD"
)]
#[case::elif_chain(
    "{% for message in messages %}{% if message.role == 'user' %}U{% elif message.role == 'system' %}S{% else %}O{% endif %}{% endfor %}",
    vec![msg("user", ""), msg("system", ""), msg("tool", "")],
    "USO"
)]
#[case::special_characters(
    "{% for message in messages %}{{ message.content }}{% endfor %}",
    vec![msg("user", "Hello <world> & \"friends\"")],
    "Hello <world> & \"friends\""
)]
#[case::unicode(
    "{% for message in messages %}{{ message.content }}{% endfor %}",
    vec![msg("user", "こんにちは 🌍")],
    "こんにちは 🌍"
)]
#[case::missing_flag_is_falsy(
    "{% for message in messages %}{{ message.role }}{% if loop.last and add_generation_prompt %}PROMPT{% endif %}{% endfor %}",
    vec![msg("user", "")],
    "user"
)]
#[case::last_message_by_negative_index(
    "{{ messages[-1].role }}|{{ messages | length }}",
    vec![msg("user", ""), msg("assistant", "")],
    "assistant|2"
)]
#[case::skip_system_with_slice(
    "{% for message in messages[1:] %}{{ message.content }}{% endfor %}",
    vec![msg("system", "S"), msg("user", "U"), msg("assistant", "A")],
    "UA"
)]
#[case::strip_and_title(
    "{% for message in messages %}{{ message.content.strip() | title }}{% endfor %}",
    vec![msg("user", "  hello there  ")],
    "Hello There"
)]
#[case::namespace_carries_state_out_of_loop(
    "{% set ns = namespace(seen=false) %}{% for message in messages %}{% if message.role == 'system' %}{% set ns.seen = true %}{% endif %}{% endfor %}{{ 'yes' if ns.seen else 'no' }}",
    vec![msg("user", ""), msg("system", "")],
    "yes"
)]
#[case::content_containing_tags_is_not_evaluated(
    "{% for message in messages %}{{ message.content }}{% endfor %}",
    vec![msg("user", "{{ secret }}{% if x %}")],
    "{{ secret }}{% if x %}"
)]
fn renders(#[case] template: &str, #[case] messages: Vec<ChatMessage>, #[case] expected: &str) {
    assert_eq!(render(template, &messages).unwrap(), expected);
}

#[rstest]
#[case::unclosed_expression("{{ message.role ")]
#[case::unclosed_if("{% if true %}x")]
#[case::stray_endfor("{% endfor %}")]
#[case::unterminated_string("{{ 'abc }}")]
#[case::ternary_without_else("{{ 'a' if true }}")]
fn rejects_malformed_templates(#[case] template: &str) {
    let err = render(template, &[]).unwrap_err();
    assert!(
        matches!(err, Error::Syntax(_) | Error::Parser(_)),
        "unexpected error for {:?}: {}",
        template,
        err
    );
}

#[test]
fn role_alternation_guard_raises() {
    let template = "{% for message in messages %}{% if (message.role == 'user') != (loop.index0 % 2 == 0) %}{{ raise_exception('Conversation roles must alternate') }}{% endif %}{{ message.content }}{% endfor %}";
    let err = render(template, &[msg("assistant", "a")]).unwrap_err();
    assert_eq!(err, Error::Runtime("Conversation roles must alternate".to_string()));
}
