use crate::models::{ChannelStats, SortBy, VideoStats};
use crate::youtube_api::{SearchOrder, YouTubeApi};

use anyhow::Result;
use colored::Colorize;

const TITLE_WIDTH: usize = 50;

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Counters for the authenticated channel, `None` if the account has no channel.
pub fn channel_stats(api: &dyn YouTubeApi) -> Result<Option<ChannelStats>> {
    api.channel_statistics()
}

/// Collects per-video statistics for the authenticated channel.
///
/// Latest mode walks search results newest first and stops paging once
/// `limit` videos are in hand. Top mode walks every page in relevance order,
/// since the best performers can sit anywhere in the result set. Either way
/// the result is sorted and cut to `limit`. `None` means there is no channel.
pub fn list_videos(
    api: &dyn YouTubeApi,
    sort_by: SortBy,
    limit: usize,
    top: bool,
) -> Result<Option<Vec<VideoStats>>> {
    let Some(channel_id) = api.channel_id()? else {
        return Ok(None);
    };

    let order = if top {
        SearchOrder::Relevance
    } else {
        SearchOrder::Date
    };

    let mut videos = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = api.search_videos(&channel_id, order, page_token.as_deref())?;
        if page.video_ids.is_empty() {
            break;
        }

        videos.extend(api.video_statistics(&page.video_ids)?);
        tracing::debug!(
            fetched = videos.len(),
            more = page.next_page_token.is_some(),
            "fetched search page"
        );

        page_token = page.next_page_token;
        if page_token.is_none() || (!top && videos.len() >= limit) {
            break;
        }
    }

    sort_videos(&mut videos, sort_by, top);
    videos.truncate(limit);
    Ok(Some(videos))
}

/// Descending by the chosen metric in top mode, by publish date otherwise.
/// Equal keys keep their upstream order.
pub fn sort_videos(videos: &mut [VideoStats], sort_by: SortBy, top: bool) {
    let metric = if top { sort_by } else { SortBy::Date };
    match metric {
        SortBy::Views => videos.sort_by(|a, b| b.views.cmp(&a.views)),
        SortBy::Likes => videos.sort_by(|a, b| b.likes.cmp(&a.likes)),
        SortBy::Comments => videos.sort_by(|a, b| b.comments.cmp(&a.comments)),
        SortBy::Date => videos.sort_by(|a, b| b.published_at.cmp(&a.published_at)),
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// `1234567` -> `1,234,567`
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// First 50 characters, with `...` appended when anything was cut.
pub fn truncate_title(title: &str) -> String {
    if title.chars().count() <= TITLE_WIDTH {
        title.to_string()
    } else {
        let kept: String = title.chars().take(TITLE_WIDTH).collect();
        format!("{kept}...")
    }
}

pub fn videos_heading(sort_by: SortBy, limit: usize, top: bool) -> String {
    if top {
        format!("=== Top {limit} Videos (sorted by {}) ===", sort_by.as_str())
    } else {
        format!("=== Latest {limit} Videos ===")
    }
}

/// Rows of (title, views, likes, comments, published) as display strings.
fn video_rows(videos: &[VideoStats]) -> Vec<[String; 5]> {
    videos
        .iter()
        .map(|v| {
            [
                truncate_title(&v.title),
                format_count(v.views),
                format_count(v.likes),
                format_count(v.comments),
                v.published_at.format("%Y-%m-%d").to_string(),
            ]
        })
        .collect()
}

/// Plain-text table: left-aligned title column, right-aligned counters.
pub fn render_video_table(videos: &[VideoStats]) -> String {
    const HEADERS: [&str; 5] = ["Title", "Views", "Likes", "Comments", "Published"];

    let rows = video_rows(videos);
    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |cells: [&str; 5]| -> String {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            let pad = widths[i] - cell.chars().count();
            if i == 0 || i == 4 {
                line.push_str(cell);
                line.push_str(&" ".repeat(pad));
            } else {
                line.push_str(&" ".repeat(pad));
                line.push_str(cell);
            }
        }
        line.trim_end().to_string()
    };

    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(format_row(HEADERS));
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for row in &rows {
        out.push(format_row([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
            row[4].as_str(),
        ]));
    }
    out.join("\n")
}

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

pub fn print_channel_stats(stats: &ChannelStats) {
    println!();
    println!("{}", "=== Channel Statistics ===".bold());
    println!("Subscribers   {:>12}", format_count(stats.subscribers));
    println!("Total Views   {:>12}", format_count(stats.total_views));
    println!("Total Videos  {:>12}", stats.video_count);
}

pub fn print_videos(videos: &[VideoStats], sort_by: SortBy, limit: usize, top: bool) {
    println!();
    println!("{}", videos_heading(sort_by, limit, top).bold());
    println!("{}", render_video_table(videos));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
