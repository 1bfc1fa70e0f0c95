use serenity::all::{CommandDataOption, CommandOptionType, CreateCommand, CreateCommandOption};

pub const EMBED_COMMAND: &str = "embed";

pub fn embed_command() -> CreateCommand {
    CreateCommand::new(EMBED_COMMAND)
        .description("Embed a video from a URL")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "url", "URL of the video to embed")
                .required(true),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "start",
                "Start time of the video in 00:00 format (e.g. 01:30)",
            )
            .required(false),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "end",
                "End time of the video in 00:00 format (e.g. 02:00)",
            )
            .required(false),
        )
}

/// Arguments of one `/embed` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedOptions {
    pub url: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl EmbedOptions {
    pub fn from_options(options: &[CommandDataOption]) -> Self {
        Self::from_pairs(
            options
                .iter()
                .map(|option| (option.name.as_str(), option.value.as_str())),
        )
    }

    /// Unknown names and non-string values are ignored; a missing url is left
    /// empty and rejected when the request is parsed.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut parsed = Self::default();
        for (name, value) in pairs {
            let Some(value) = value else { continue };
            match name {
                "url" => parsed.url = value.to_string(),
                "start" => parsed.start = Some(value.to_string()),
                "end" => parsed.end = Some(value.to_string()),
                _ => {}
            }
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_known_options() {
        let options = EmbedOptions::from_pairs([
            ("url", Some("https://youtu.be/abc")),
            ("start", Some("01:30")),
            ("end", Some("02:00")),
            ("colour", Some("red")),
        ]);
        assert_eq!(options.url, "https://youtu.be/abc");
        assert_eq!(options.start.as_deref(), Some("01:30"));
        assert_eq!(options.end.as_deref(), Some("02:00"));
    }

    #[test]
    fn optional_bounds_stay_absent() {
        let options = EmbedOptions::from_pairs([("url", Some("https://youtu.be/abc")), ("end", None)]);
        assert!(options.start.is_none());
        assert!(options.end.is_none());
    }

    #[test]
    fn command_definition_matches_registration() {
        let json = serde_json::to_value(embed_command()).unwrap();
        assert_eq!(json["name"], "embed");
        let options = json["options"].as_array().unwrap();
        let names: Vec<&str> = options
            .iter()
            .map(|option| option["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["url", "start", "end"]);
        assert_eq!(options[0]["required"], true);
    }
}
