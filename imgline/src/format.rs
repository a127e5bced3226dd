use colored::{Color, Colorize};
use imagegen::types::{Favorite, GeneratedImage, Stats, UserProfile};
use std::fmt::Write;
use time::macros::format_description;
use time::OffsetDateTime;

pub fn format_time(value: OffsetDateTime) -> String {
    value
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| value.to_string())
}

fn style_color(style: Option<&str>) -> Color {
    match style {
        Some("anime") => Color::Magenta,
        Some("painting") => Color::Yellow,
        Some("cartoon") => Color::Cyan,
        Some("minimalist") => Color::White,
        _ => Color::Green,
    }
}

pub fn format_image(image: &GeneratedImage) -> String {
    let favorite = if image.is_favorite { "★" } else { " " };
    let enhanced = if image.ai_enhanced { "✦" } else { " " };
    let style = image.style.as_deref().unwrap_or("-");
    let created = image.created_at.map(format_time).unwrap_or_default();

    let header = format!(
        "{favorite}{enhanced} {:>6}  {:12} {}",
        image.id,
        style.color(style_color(image.style.as_deref())),
        created.dimmed()
    );
    format!(
        "{header}\n          {}\n          {}",
        image.original_prompt,
        image.image_url.underline()
    )
}

pub fn format_generated(image: &GeneratedImage) -> String {
    let mut lines = vec![format!("{} {}", "Image".bold(), image.id)];
    if image.ai_enhanced {
        lines.push(format!("{} {}", "Enhanced prompt:".green(), image.improved_prompt));
    } else {
        lines.push(format!("{} {}", "Prompt:".normal(), image.improved_prompt));
    }
    if let Some(style) = &image.style {
        lines.push(format!("Style: {}", style.color(style_color(Some(style.as_str())))));
    }
    lines.push(image.image_url.underline().to_string());
    lines.join("\n")
}

pub fn format_favorite(favorite: &Favorite) -> String {
    let id = favorite
        .id
        .map_or_else(|| "pending".to_string(), |id| id.to_string());
    format!(
        "{}  {}  {}\n          {}",
        format!("{:>6}", favorite.image.id).yellow(),
        format_time(favorite.added_at).dimmed(),
        format!("(favorite {id})").dimmed(),
        favorite.image.original_prompt
    )
}

pub fn format_stats(stats: &Stats) -> String {
    format!(
        "Images: {}  Favorites: {}  Collections: {}",
        stats.total_images.to_string().bold(),
        stats.total_favorites.to_string().bold(),
        stats.total_collections.to_string().bold()
    )
}

pub fn format_user(user: &UserProfile) -> String {
    let mut output = format!("{} <{}>", user.username.bold(), user.email);
    if let Some(created) = user.created_at {
        let _ = write!(output, "\nMember since {}", format_time(created));
    }
    if let Some(last) = user.last_login {
        let _ = write!(output, "\nLast login {}", format_time(last));
    }
    output
}
