//! Line-oriented interactive session.

use crate::{knowledge_base_available, print_report, stage_path, NO_KNOWLEDGE_BASE};
use pocket_rag_core::{Answer, RagError, RagSession, TextGenerator, VectorIndex};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

const HELP: &str = "\
commands:
  :upload <path>   add a text/PDF file or a folder of them
  :remove <name>   remove an ingested file
  :files           list ingested files
  :help            show this message
  :quit            leave
anything else is sent as a question";

enum Line<'a> {
    Upload(&'a str),
    Remove(&'a str),
    Files,
    Help,
    Quit,
    Question(&'a str),
    Empty,
}

fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Empty;
    }
    let Some(command) = line.strip_prefix(':') else {
        return Line::Question(line);
    };

    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };
    match name {
        "upload" => Line::Upload(argument),
        "remove" => Line::Remove(argument),
        "files" => Line::Files,
        "quit" | "exit" => Line::Quit,
        _ => Line::Help,
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn ask<V, G>(session: &RagSession<V, G>, question: &str) -> Result<Answer, RagError>
where
    V: VectorIndex + Send + Sync,
    G: TextGenerator + Send + Sync,
{
    if !question.trim().is_empty() && !knowledge_base_available(session).await? {
        println!("{NO_KNOWLEDGE_BASE}");
    }
    session.ask(question).await
}

pub async fn run<V, G>(mut session: RagSession<V, G>) -> anyhow::Result<()>
where
    V: VectorIndex + Send + Sync,
    G: TextGenerator + Send + Sync,
{
    println!("Chat with your documents ({}). Type :help for commands.", session.generator().name());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Line::Empty => {}
            Line::Help => println!("{HELP}"),
            Line::Quit => break,
            Line::Files => {
                if session.files().is_empty() {
                    println!("no files ingested");
                }
                for name in session.files() {
                    println!("{name}");
                }
                match session.collection_count().await {
                    Ok(count) => println!("collection count: {count}"),
                    Err(error) => println!("error: {error}"),
                }
            }
            Line::Upload("") => println!("usage: :upload <path>"),
            Line::Upload(path) => match stage_path(&mut session, Path::new(path)) {
                Ok(0) => {}
                Ok(_) => print_report(&session.sync_collection().await),
                Err(error) => println!("error: {error:#}"),
            },
            Line::Remove("") => println!("usage: :remove <name>"),
            Line::Remove(name) => match session.remove_file(name).await {
                Ok(removed) => println!("removed {removed} chunks from {name}"),
                Err(error) => println!("error: {error}"),
            },
            Line::Question(question) => match ask(&session, question).await {
                Ok(answer) => {
                    debug!(sources = ?answer.context.sources(), "answered");
                    println!("Response:\n{}", answer.response.trim());
                }
                Err(RagError::EmptyQuestion) => println!("Please enter a question."),
                Err(error) => println!("An error occurred: {error}"),
            },
        }
        prompt();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pocket_rag_core::{
        CharacterNgramEmbedder, Embedder, GenerationParams, InferenceError, MemoryCollection,
        SessionOptions, Upload, UploadRegistry,
    };

    struct EchoModel;

    #[async_trait]
    impl TextGenerator for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, InferenceError> {
            Ok(prompt.to_string())
        }
    }

    #[tokio::test]
    async fn filtered_context_is_not_a_missing_knowledge_base() -> Result<(), RagError> {
        let embedder = CharacterNgramEmbedder::default();
        let options = SessionOptions {
            similarity_threshold: Some(1.0),
            ..SessionOptions::default()
        };
        let mut session = RagSession::new(
            MemoryCollection::ephemeral("chat", embedder.dimensions()),
            EchoModel,
            embedder,
            UploadRegistry::in_memory(),
            options,
        );
        assert!(!knowledge_base_available(&session).await?);

        session.stage_upload(Upload {
            name: "tides.txt".to_string(),
            bytes: b"High tide arrives twice a day.".to_vec(),
        })?;
        session.sync_collection().await;

        let answer = ask(&session, "When is lunch served?").await?;
        assert!(answer.context.is_empty());
        assert!(knowledge_base_available(&session).await?);
        Ok(())
    }

    #[test]
    fn plain_text_is_a_question() {
        assert!(matches!(parse_line("  what is rust? "), Line::Question("what is rust?")));
        assert!(matches!(parse_line("   "), Line::Empty));
    }

    #[test]
    fn commands_take_the_rest_of_the_line() {
        assert!(matches!(parse_line(":upload  notes/my file.txt"), Line::Upload("notes/my file.txt")));
        assert!(matches!(parse_line(":remove report.pdf"), Line::Remove("report.pdf")));
        assert!(matches!(parse_line(":upload"), Line::Upload("")));
        assert!(matches!(parse_line(":files"), Line::Files));
        assert!(matches!(parse_line(":exit"), Line::Quit));
        assert!(matches!(parse_line(":bogus"), Line::Help));
    }
}
