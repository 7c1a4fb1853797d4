use html_escape::encode_quoted_attribute as escape;

use crate::feed::Article;

/// Dashed rule placed between digest items, and before the first and after
/// the last.
pub const DIGEST_SEPARATOR: &str =
    r#"<hr class="separator" style="border:none;border-top:2px dashed #ccc;margin:16px 0;">"#;

/// Subject line of a run: `🫖 Headlines (N) Hh`.
pub fn digest_subject(count: usize, hour: u32) -> String {
    format!("🫖 Headlines ({count}) {hour}h")
}

/// `<b>Header</b>: Title`, or just the title when the header is empty.
fn headline(article: &Article) -> String {
    let title = escape(&article.title);
    if article.header.is_empty() {
        title.into_owned()
    } else {
        format!("<b>{}</b>: {}", escape(&article.header), title)
    }
}

/// One digest paragraph; the whole headline links to the article.
pub fn format_digest_item(article: &Article) -> String {
    format!(
        r#"<p class="item" style="color:#000000;margin:0;"><a href="{}" style="color:#000000;text-decoration:none;">{}</a></p>"#,
        escape(&article.link),
        headline(article)
    )
}

/// Full HTML document for a digest of pre-formatted items.
pub fn build_digest_html(items: &[String], subject: &str) -> String {
    let mut body = String::from(DIGEST_SEPARATOR);
    for item in items {
        body.push_str(item);
        body.push_str(DIGEST_SEPARATOR);
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{}</title>
</head>
<body style="font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,Arial,Helvetica,sans-serif;font-size:18px;line-height:1.4;">
{}
</body>
</html>
"#,
        escape(subject),
        body
    )
}

/// Chat message in Telegram's HTML parse mode.
pub fn format_chat_message(article: &Article) -> String {
    let title = escape(&article.title);
    let link = escape(&article.link);
    if article.header.is_empty() {
        format!(r#"<a href="{link}">{title}</a>"#)
    } else {
        format!(
            r#"<b>{}</b>: <a href="{link}">{title}</a>"#,
            escape(&article.header)
        )
    }
}
