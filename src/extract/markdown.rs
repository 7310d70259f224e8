//! Markdown rendering of an extracted post.

use std::sync::LazyLock;

use regex::Regex;

use crate::post::{ImageMap, PostRecord};

static VIDEO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<video\b.*?</video>").expect("valid regex"));

fn placeholder(i: usize) -> String {
    format!("XVIDEOBLOCK{i}X")
}

/// Convert rewritten body HTML to Markdown. Inline `<video>` blocks have no
/// Markdown form and are carried through as raw HTML.
pub fn html_to_markdown(html: &str) -> String {
    let mut videos = Vec::new();
    let protected = VIDEO_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        videos.push(caps[0].to_string());
        format!("<p>{}</p>", placeholder(videos.len() - 1))
    });

    let mut markdown = html2md::rewrite_html(&protected, true);
    for (i, video) in videos.iter().enumerate() {
        markdown = markdown.replace(&placeholder(i), video);
    }
    markdown.trim().to_string()
}

/// Full Markdown document: linked title, optional subtitle, date, body, then
/// gallery, attachments and tags sections when non-empty.
pub fn render(record: &PostRecord, body: &str, gallery: &ImageMap) -> String {
    let mut md = format!("# [{}]({})\n", record.title, record.url);
    if let Some(subtitle) = &record.subtitle {
        md.push_str(&format!("\n#### *{subtitle}*\n"));
    }
    md.push_str(&format!(
        "\n*Date: {}*\n\n{body}\n",
        record.timestamp.format("%d %B %Y")
    ));

    let files: Vec<&str> = gallery.filenames().collect();
    if !files.is_empty() {
        md.push_str("\n\n## Gallery\n");
        for file in files {
            md.push_str(&format!("![{file}]({file})\n"));
        }
    }
    if !record.attachments.is_empty() {
        md.push_str("\n\n## Attachments\n");
        let links: Vec<String> = record
            .attachments
            .iter()
            .map(|a| format!("[{a}]({a})"))
            .collect();
        md.push_str(&links.join("\n"));
        md.push('\n');
    }
    if !record.tags.is_empty() {
        md.push_str("\n\n## Tags\n");
        let tags: Vec<String> = record.tags.iter().map(|t| format!("`{t}`")).collect();
        md.push_str(&tags.join(" "));
        md.push('\n');
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn record() -> PostRecord {
        PostRecord {
            url: "https://writer.substack.com/p/hello".to_string(),
            name: "hello".to_string(),
            title: "Hello".to_string(),
            subtitle: Some("A first post".to_string()),
            tags: vec!["art".to_string(), "wip".to_string()],
            timestamp: Local.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
            attachments: vec!["sketch.zip".to_string()],
            images: ImageMap::new(),
        }
    }

    #[test]
    fn renders_every_section() {
        let gallery: ImageMap = [("a", "hello-a.png")].into_iter().collect();
        let md = render(&record(), "Body text", &gallery);

        assert!(md.starts_with("# [Hello](https://writer.substack.com/p/hello)\n"));
        assert!(md.contains("#### *A first post*"));
        assert!(md.contains("*Date: 05 March 2024*"));
        assert!(md.contains("Body text"));
        assert!(md.contains("## Gallery\n![hello-a.png](hello-a.png)"));
        assert!(md.contains("## Attachments\n[sketch.zip](sketch.zip)"));
        assert!(md.contains("## Tags\n`art` `wip`"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let mut bare = record();
        bare.subtitle = None;
        bare.tags.clear();
        bare.attachments.clear();
        let md = render(&bare, "Body", &ImageMap::new());
        assert!(!md.contains("####"));
        assert!(!md.contains("## Gallery"));
        assert!(!md.contains("## Attachments"));
        assert!(!md.contains("## Tags"));
    }

    #[test]
    fn videos_survive_conversion() {
        let html = r#"<p>Intro</p><video controls=""><source type="video/mp4" src="clip.mp4"></video>"#;
        let md = html_to_markdown(html);
        assert!(md.contains("Intro"));
        assert!(md.contains(r#"<source type="video/mp4" src="clip.mp4">"#));
        assert!(!md.contains("XVIDEOBLOCK"));
    }

    #[test]
    fn images_become_markdown_images() {
        let md = html_to_markdown(r#"<p><img src="post-a.png"></p>"#);
        assert!(md.contains("post-a.png"));
    }
}
