//! Race text provider

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::io;
use std::path::Path;

const BUILTIN_SENTENCES: &[&str] = &[
    "Kindness in words creates confidence. Kindness in thinking creates profoundness. Kindness in giving creates love.",
    "The best way to predict the future is to invent it, and the second best way is to type faster than everyone else.",
    "Simplicity is prerequisite for reliability, and reliability is what keeps a server running through the night.",
    "It does not matter how slowly you go as long as you do not stop, but it helps to keep your fingers on home row.",
    "Programs must be written for people to read, and only incidentally for machines to execute.",
    "A journey of a thousand miles begins with a single step, and a race of a thousand words begins with a single key.",
];

#[derive(Debug, thiserror::Error)]
pub enum WordsError {
    #[error("no race text available")]
    Empty,
    #[error("failed to read sentences: {0}")]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait WordSource: Send + Sync {
    /// Returns the words of a race text, never empty on success
    async fn fetch(&self) -> Result<Vec<String>, WordsError>;
}

/// Picks a random sentence from a fixed list
pub struct SentenceBank {
    sentences: Vec<String>,
}

impl SentenceBank {
    pub fn new(sentences: Vec<String>) -> Result<Self, WordsError> {
        let sentences: Vec<String> = sentences
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if sentences.is_empty() {
            return Err(WordsError::Empty);
        }
        Ok(Self { sentences })
    }

    pub fn builtin() -> Self {
        Self {
            sentences: BUILTIN_SENTENCES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Loads one sentence per line
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, WordsError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::new(contents.lines().map(str::to_string).collect())
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

pub fn split_words(sentence: &str) -> Vec<String> {
    sentence.split_whitespace().map(str::to_string).collect()
}

#[async_trait]
impl WordSource for SentenceBank {
    async fn fetch(&self) -> Result<Vec<String>, WordsError> {
        let sentence = self
            .sentences
            .choose(&mut rand::thread_rng())
            .ok_or(WordsError::Empty)?;
        Ok(split_words(sentence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words("  Kindness in   words\tcreates confidence. "),
            vec!["Kindness", "in", "words", "creates", "confidence."]
        );
        assert!(split_words("   ").is_empty());
    }

    #[test]
    fn test_bank_drops_blank_sentences() {
        let bank = SentenceBank::new(vec!["one two".into(), "   ".into(), "".into()]).unwrap();
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn test_bank_rejects_only_blank_sentences() {
        assert!(matches!(
            SentenceBank::new(vec!["  ".into()]),
            Err(WordsError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_builtin_fetch_is_never_empty() {
        let bank = SentenceBank::builtin();
        assert!(!bank.is_empty());
        for _ in 0..20 {
            let words = bank.fetch().await.unwrap();
            assert!(!words.is_empty());
        }
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "the quick brown fox").unwrap();
        writeln!(file).unwrap();

        let bank = SentenceBank::from_file(file.path()).await.unwrap();
        assert_eq!(bank.len(), 1);
        assert_eq!(
            bank.fetch().await.unwrap(),
            vec!["the", "quick", "brown", "fox"]
        );
    }

    #[tokio::test]
    async fn test_from_missing_file() {
        let result = SentenceBank::from_file("/definitely/not/here.txt").await;
        assert!(matches!(result, Err(WordsError::Io(_))));
    }
}
