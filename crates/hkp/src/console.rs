use hkp_core::{
    domain::Caller,
    render,
    sentence::Category,
    service::HitokotoService,
};

pub const PLATFORM: &str = "console";

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Hitokoto(Option<Category>),
    Favorite,
    Favorites(usize),
    View(usize),
    Delete(usize),
    Stats,
    /// Empty means the configured warmup categories.
    Warmup(Vec<Category>),
    Help,
    Quit,
    Usage(&'static str),
    Unknown(String),
}

/// One console line: an optional `@group` prefix, then a slash command.
#[derive(Clone, Debug, PartialEq)]
pub struct Line {
    pub group: Option<String>,
    pub command: Command,
}

fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();
    (first.trim_start_matches('/').to_lowercase(), rest)
}

pub fn parse_line(raw: &str) -> Option<Line> {
    let mut text = raw.trim();
    if text.is_empty() {
        return None;
    }

    let mut group = None;
    if let Some(rest) = text.strip_prefix('@') {
        let (g, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if !g.is_empty() {
            group = Some(g.to_string());
        }
        text = tail.trim();
    }

    let (cmd, arg) = parse_command(text);
    let number = arg.split_whitespace().next().and_then(|s| s.parse::<usize>().ok());

    let command = match cmd.as_str() {
        "hitokoto" | "h" => Command::Hitokoto(Category::parse_arg(&arg)),
        "fav" => Command::Favorite,
        "favs" => Command::Favorites(number.unwrap_or(1)),
        "view" => number.map_or(Command::Usage("/view <n>"), Command::View),
        "del" => number.map_or(Command::Usage("/del <n>"), Command::Delete),
        "stats" => Command::Stats,
        "warmup" => Command::Warmup(
            arg.split_whitespace()
                .filter_map(Category::parse_arg)
                .collect(),
        ),
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(cmd),
    };

    Some(Line { group, command })
}

pub fn caller_for(user: &str, group: Option<String>) -> Caller {
    match group {
        Some(g) => Caller::in_group(PLATFORM, g, user),
        None => Caller::private(PLATFORM, user),
    }
}

pub fn help_text() -> String {
    let types = Category::ALL
        .iter()
        .map(|c| format!("{}={}", c.code(), c.display_name()))
        .collect::<Vec<_>>()
        .join(", ");
    [
        "Commands:",
        "  /hitokoto [type]  get a sentence",
        "  /fav              save the last sentence",
        "  /favs [page]      list your favorites",
        "  /view <n>         show favorite n",
        "  /del <n>          delete favorite n (send twice to confirm)",
        "  /stats            cache and limiter stats",
        "  /warmup [types]   prefill the cache now",
        "  /quit             exit",
        "Prefix a line with @group to speak in a group.",
    ]
    .join("\n")
        + &format!("\nTypes: {types}")
}

/// Run one command and produce the reply text.
pub async fn handle(svc: &HitokotoService, caller: &Caller, command: Command) -> String {
    let reply = match command {
        Command::Hitokoto(category) => svc.serve(caller, category).await.map(|served| {
            render::format_sentence(&served.sentence, Some(svc.config().favorite_timeout))
        }),
        Command::Favorite => svc
            .add_favorite(caller)
            .await
            .map(|r| render::format_added(&r)),
        Command::Favorites(page) => svc
            .list_favorites(caller, page)
            .await
            .map(|p| render::format_page(&caller.user.to_string(), &p)),
        Command::View(index) => svc
            .view_favorite(caller, index)
            .await
            .map(|r| render::format_detail(&r)),
        Command::Delete(index) => svc
            .request_delete(caller, index)
            .await
            .map(|o| render::format_delete(&o)),
        Command::Stats => {
            let s = svc.stats().await;
            Ok(format!(
                "cached: {}\nhits: {}\nmisses: {}\nhit rate: {:.1}%\ncycle resets: {}\nrate windows: {}",
                s.cached_sentences,
                s.cache.hits,
                s.cache.misses,
                s.cache.hit_rate() * 100.0,
                s.cache.cycle_resets,
                s.rate_windows
            ))
        }
        Command::Warmup(categories) => {
            let categories = if categories.is_empty() {
                svc.config().warmup_categories.clone()
            } else {
                categories
            };
            svc.warmup(&categories).await.map(|report| {
                let mut lines = vec![format!(
                    "warmup loaded {} sentences",
                    report.loaded.values().sum::<usize>()
                )];
                lines.extend(
                    report
                        .loaded
                        .iter()
                        .filter(|(_, n)| **n > 0)
                        .map(|(c, n)| format!("  {}: {n}", c.display_name())),
                );
                if !report.failed.is_empty() {
                    let failed = report
                        .failed
                        .iter()
                        .map(|c| c.display_name())
                        .collect::<Vec<_>>()
                        .join(", ");
                    lines.push(format!("failed: {failed}"));
                }
                lines.join("\n")
            })
        }
        Command::Help => Ok(help_text()),
        Command::Quit => Ok(String::new()),
        Command::Usage(usage) => Ok(format!("Usage: {usage}")),
        Command::Unknown(cmd) => Ok(format!("Unknown command /{cmd}. Try /help.")),
    };

    match reply {
        Ok(text) => text,
        Err(e) => {
            if !e.is_user_facing() {
                tracing::warn!(user = %caller.user, "request failed: {e}");
            }
            render::format_error(&e)
        }
    }
}
