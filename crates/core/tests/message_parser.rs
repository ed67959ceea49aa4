use std::sync::Arc;

use mailtrack_core::{
    decode_click_path, EmailMessage, MessageParser, TrackDomain, TrackDomainLookup,
    TrackDomainRegistry,
};
use url::Url;

const PIXEL_PREFIX: &str = "<p class='ampimg' style='display:none;visibility:none;margin:0;padding:0;line-height:0;'><img src='https://click.example.com";

fn plain_message(body: &str, headers: &[(&str, &str)]) -> EmailMessage {
    let mut raw = String::from("Subject: Hello\r\n");
    for (name, value) in headers {
        raw.push_str(&format!("{name}: {value}\r\n"));
    }
    raw.push_str("\r\n");
    raw.push_str(body);
    EmailMessage::with_server("srv1", "test@example.com", "rcpt@example.org", &raw)
}

fn html_message(body: &str, headers: &[(&str, &str)]) -> EmailMessage {
    let mut all = vec![("Content-Type", "text/html; charset=UTF-8")];
    all.extend_from_slice(headers);
    plain_message(body, &all)
}

fn tracked_parser() -> MessageParser {
    MessageParser::new(Arc::new(
        TrackDomainRegistry::new().with("srv1", TrackDomain::new("example.com")),
    ))
}

#[test]
fn test_no_track_domains() {
    let registry = TrackDomainRegistry::new();
    assert!(registry.is_empty());

    let parser = MessageParser::new(Arc::new(registry));
    let message = plain_message("Hello world!", &[]);
    let result = parser.parse(&message).unwrap();

    assert!(!result.actioned);
    assert_eq!(result.tracked_links, 0);
    assert_eq!(result.tracked_images, 0);
    assert_eq!(result.body, "Hello world!");
}

#[test]
fn test_replaces_links() {
    let message = plain_message("Hello world! http://github.com/atech/postal", &[]);
    let result = tracked_parser().parse(&message).unwrap();

    assert!(result.actioned);
    assert!(result
        .body
        .starts_with("Hello world! https://click.example.com"));
    assert_eq!(result.tracked_links, 1);
}

#[test]
fn test_click_opt_out_header() {
    let message = plain_message(
        "Hello world! http://github.com/atech/postal",
        &[("x-track-clicks", "no")],
    );
    let result = tracked_parser().parse(&message).unwrap();

    assert!(!result.actioned);
    assert!(result
        .body
        .contains("Hello world! http://github.com/atech/postal"));
    assert_eq!(result.tracked_links, 0);
}

#[test]
fn test_inserts_tracking_pixel() {
    let message = html_message(
        "<p>Hello world! <a href='http://github.com/atech/postal'>Github</a></p>",
        &[],
    );
    let result = tracked_parser().parse(&message).unwrap();

    assert!(result.actioned);
    assert!(result.body.contains(PIXEL_PREFIX));
    assert_eq!(result.tracked_images, 1);
}

#[test]
fn test_open_opt_out_header() {
    let message = html_message(
        "<p>Hello world! <a href='http://github.com/atech/postal'>Github</a></p>",
        &[("x-track-opens", "no")],
    );
    let result = tracked_parser().parse(&message).unwrap();

    assert!(result.actioned);
    assert!(!result.body.contains(PIXEL_PREFIX));
    assert_eq!(result.tracked_images, 0);
    assert_eq!(result.tracked_links, 1);
}

#[test]
fn test_click_opt_out_keeps_pixel() {
    let body = "<p>Hello world! <a href='http://github.com/atech/postal'>Github</a></p>";
    let message = html_message(body, &[("X-Track-Clicks", "NO")]);
    let result = tracked_parser().parse(&message).unwrap();

    assert!(result.actioned);
    assert_eq!(result.tracked_links, 0);
    assert_eq!(result.tracked_images, 1);
    assert!(result.body.starts_with(body));
}

#[test]
fn test_other_header_values_keep_tracking() {
    let message = plain_message(
        "http://github.com",
        &[("x-track-clicks", "yes"), ("x-track-opens", "maybe")],
    );
    let result = tracked_parser().parse(&message).unwrap();
    assert_eq!(result.tracked_links, 1);
}

#[test]
fn test_links_round_trip_to_original() {
    let message = html_message(
        "<a href=\"https://example.org/a?b=1&amp;c=2\">one</a> <a href='http://github.com/atech/postal'>two</a>",
        &[("x-track-opens", "no")],
    );
    let result = tracked_parser().parse(&message).unwrap();
    assert_eq!(result.tracked_links, 2);

    let targets: Vec<String> = result
        .body
        .split(['"', '\''])
        .filter(|part| part.starts_with("https://click.example.com/"))
        .map(|href| {
            let url = Url::parse(href).unwrap();
            decode_click_path(url.path()).unwrap().url
        })
        .collect();
    assert_eq!(
        targets,
        vec![
            "https://example.org/a?b=1&c=2".to_string(),
            "http://github.com/atech/postal".to_string()
        ]
    );
}

#[test]
fn test_content_preserved_outside_links() {
    let before = "<html><head><style>a { color: red; }</style></head><body>\r\n<p>Dear  user,</p>\r\n<a data-id=\"7\" href=\"";
    let middle = "\" class=\"cta\">Click &amp; go</a>\r\n<a href=\"mailto:help@example.com\">help</a>\r\n";
    let after = "</body></html>";
    let body = format!("{before}http://github.com/atech/postal{middle}{after}");
    let message = html_message(&body, &[]);
    let result = tracked_parser().parse(&message).unwrap();

    assert_eq!(result.tracked_links, 1);
    assert_eq!(result.tracked_images, 1);
    assert!(result.body.starts_with(&format!("{before}https://click.example.com/srv1/")));
    let (_, rest) = result.body.split_once(middle).unwrap();
    assert!(rest.starts_with("<p class='ampimg'"));
    assert!(rest.ends_with(&format!("</p>{after}")));
}

#[test]
fn test_single_pixel_for_large_messages() {
    let mut body = String::from("<html><body>");
    for index in 0..50 {
        body.push_str(&format!("<p><a href='https://example.org/{index}'>{index}</a></p>"));
    }
    body.push_str("</body></html>");
    let result = tracked_parser().parse(&html_message(&body, &[])).unwrap();

    assert_eq!(result.tracked_links, 50);
    assert_eq!(result.tracked_images, 1);
    assert_eq!(result.body.matches("class='ampimg'").count(), 1);
}

#[test]
fn test_actioned_matches_counters() {
    let parser = tracked_parser();
    let cases = [
        (plain_message("no links", &[]), 0, 0),
        (plain_message("http://github.com", &[]), 1, 0),
        (
            plain_message("http://github.com", &[("x-track-clicks", "no")]),
            0,
            0,
        ),
        (html_message("<p>plain html</p>", &[]), 0, 1),
        (
            html_message("<p>plain html</p>", &[("x-track-opens", "no")]),
            0,
            0,
        ),
        (
            html_message(
                "<a href='http://github.com'>x</a>",
                &[("x-track-opens", "no"), ("x-track-clicks", "no")],
            ),
            0,
            0,
        ),
    ];
    for (message, links, images) in &cases {
        let result = parser.parse(message).unwrap();
        assert_eq!(result.tracked_links, *links);
        assert_eq!(result.tracked_images, *images);
        assert_eq!(
            result.actioned,
            result.tracked_links > 0 || result.tracked_images > 0
        );
    }
}

#[test]
fn test_plain_links_keep_url_characters() {
    let message = plain_message(
        "See https://en.wikipedia.org/wiki/Rust_(programming_language) and https://example.org/reset?t=YWJjZA== now",
        &[],
    );
    let result = tracked_parser().parse(&message).unwrap();
    assert_eq!(result.tracked_links, 2);

    let words: Vec<&str> = result.body.split(' ').collect();
    assert_eq!(words[0], "See");
    assert_eq!(words[2], "and");
    assert_eq!(words[4], "now");

    let targets: Vec<String> = [words[1], words[3]]
        .iter()
        .map(|href| {
            let url = Url::parse(href).unwrap();
            decode_click_path(url.path()).unwrap().url
        })
        .collect();
    assert_eq!(
        targets,
        vec![
            "https://en.wikipedia.org/wiki/Rust_(programming_language)".to_string(),
            "https://example.org/reset?t=YWJjZA==".to_string()
        ]
    );
}

#[test]
fn test_parser_shared_between_threads() {
    let parser = Arc::new(tracked_parser());
    let handles: Vec<_> = (0..4)
        .map(|index| {
            let parser = parser.clone();
            std::thread::spawn(move || {
                let message =
                    plain_message(&format!("link {index}: http://github.com/{index}"), &[]);
                parser.parse(&message).unwrap().tracked_links
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 1);
    }
}

struct DatabaseLookup;

impl TrackDomainLookup for DatabaseLookup {
    fn find_track_domain(&self, server: &str, domain: &str) -> Option<TrackDomain> {
        (server == "srv1" && domain == "example.com").then(|| TrackDomain::new("example.com"))
    }
}

#[test]
fn test_custom_lookup() {
    let parser = MessageParser::new(Arc::new(DatabaseLookup));
    let result = parser
        .parse(&plain_message("Hello world! http://github.com/atech/postal", &[]))
        .unwrap();
    assert_eq!(result.tracked_links, 1);
    assert!(DatabaseLookup.has_track_domain("srv1", "example.com"));
}
