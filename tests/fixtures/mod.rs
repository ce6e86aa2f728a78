//! HTML fixtures shaped like topic pages of the quote site.
#![allow(dead_code)]

/// A container whose "view quote" image carries `text - author` alt-text.
pub fn quote_container(index: usize, text: &str, author: &str, image_src: &str) -> String {
    let slug = author.to_lowercase().replace(' ', "_");
    format!(
        r#"<div class="bqQt">
             <a href="/quotes/{slug}_{id}" title="view quote">
               <img src="{image_src}" alt="{text} - {author}">
             </a>
           </div>"#,
        id = 100 + index,
    )
}

/// A container that only holds a share prompt.
pub fn placeholder_container(index: usize) -> String {
    format!(
        r#"<div class="bqQt">
             <a href="/quotes/share_{index}" title="view quote">
               <img src="/img/share.png" alt="Share this quote">
             </a>
           </div>"#
    )
}

pub fn topic_page(containers: &[String]) -> String {
    format!(
        "<html><head><title>Motivational Quotes</title></head><body>{}</body></html>",
        containers.join("\n")
    )
}

/// `count` valid containers with distinct text and a shared author.
pub fn valid_containers(count: usize, image_base: &str) -> Vec<String> {
    (0..count)
        .map(|i| {
            quote_container(
                i,
                &format!("Quote number {i} keeps you moving forward"),
                "Albert Einstein",
                &format!("{image_base}/img/q{i}.png"),
            )
        })
        .collect()
}

pub const CHALLENGE_PAGE: &str = r#"<html><head><title>Just a moment...</title></head>
<body><p>Checking your browser before accessing the site.</p></body></html>"#;

/// 1x1 transparent PNG.
pub const PNG_PIXEL: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];
