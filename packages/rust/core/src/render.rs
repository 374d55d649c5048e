//! Text written into mirrored documents.

use kbmirror_shared::{ArticleRecord, ClusterAssignment, LabelFilter};

/// Full content of an article's document.
pub fn render_article(article: &ArticleRecord) -> String {
    format!(
        "{url}\n\nTitle: {title}\n\nBody:\n{body}\n\nSummary:\n{summary}",
        url = article.url,
        title = article.title,
        body = article.body,
        summary = article.summary,
    )
}

/// Contents of the examples block, or `None` when the filter leaves no
/// tickets to show.
pub fn render_examples(
    heading: &str,
    assignments: &[ClusterAssignment],
    filter: LabelFilter,
) -> Option<String> {
    let mut out = String::new();
    let mut shown = 0;

    for assignment in assignments {
        if filter == LabelFilter::ClusteredOnly && assignment.label.is_noise() {
            continue;
        }
        let ticket = &assignment.ticket;
        out.push_str(&format!("- Title: {}\n", ticket.title.trim()));
        out.push_str(&format!(
            "  Description: {}\n",
            ticket.description.as_deref().unwrap_or_default()
        ));
        shown += 1;
    }

    if shown == 0 {
        return None;
    }
    Some(format!("{heading}\n{}", out.trim_end_matches('\n')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbmirror_shared::{ArticleId, ClusterLabel, Revision, TicketRow};

    fn assignment(id: i64, title: &str, description: Option<&str>, label: i32) -> ClusterAssignment {
        ClusterAssignment {
            ticket: TicketRow {
                ticket_id: ArticleId::from(id),
                title: title.into(),
                description: description.map(str::to_string),
                article_subject: None,
                article_id: ArticleId::from(7),
            },
            label: ClusterLabel(label),
        }
    }

    #[test]
    fn article_template() {
        let article = ArticleRecord {
            article_id: ArticleId::from(12),
            title: "VPN".into(),
            body: "Install it.".into(),
            summary: "How to VPN".into(),
            revision: Revision::from(2),
            url: "https://kb.example.com/12".into(),
        };
        assert_eq!(
            render_article(&article),
            "https://kb.example.com/12\n\nTitle: VPN\n\nBody:\nInstall it.\n\nSummary:\nHow to VPN"
        );
    }

    #[test]
    fn examples_list_every_ticket_by_default() {
        let rows = vec![
            assignment(1, "Can't log in", Some("password reset loop"), -1),
            assignment(2, "VPN drops", None, 0),
        ];
        let rendered = render_examples("Examples:", &rows, LabelFilter::All).unwrap();
        assert_eq!(
            rendered,
            "Examples:\n- Title: Can't log in\n  Description: password reset loop\n- Title: VPN drops\n  Description: "
        );
    }

    #[test]
    fn clustered_only_drops_noise() {
        let rows = vec![
            assignment(1, "noise", None, -1),
            assignment(2, "kept", Some("d"), 3),
        ];
        let rendered = render_examples("H", &rows, LabelFilter::ClusteredOnly).unwrap();
        assert!(rendered.contains("kept"));
        assert!(!rendered.contains("noise"));

        let only_noise = vec![assignment(1, "noise", None, -1)];
        assert!(render_examples("H", &only_noise, LabelFilter::ClusteredOnly).is_none());
    }
}
