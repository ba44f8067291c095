//! Reference detector tests
//!
//! Exercises the pattern, NER and LLM detectors through
//! `StandardDetectorFactory` with in-process NER engines and LLM clients.

use pii_oxide::assign::SlotId;
use pii_oxide::config::{PipelineConfig, ResourceKind};
use pii_oxide::detectors::{
    Detector, DetectorFactory, LlmClient, LlmDetector, NerEngine, NerEntity, NerModelLoader,
    PatternDetector, StandardDetectorFactory,
};
use pii_oxide::document::{Document, PageStatus};
use pii_oxide::error::{Error, Result};
use pii_oxide::language::ScriptLanguageIdentifier;
use pii_oxide::runner::PipelineRunner;
use pii_oxide::span::EntityType;
use std::sync::{Arc, Mutex};

/// Engine tagging fixed character ranges of every text.
struct StubEngine {
    entities: Vec<NerEntity>,
}

impl NerEngine for StubEngine {
    fn entities(&mut self, _text: &str) -> Result<Vec<NerEntity>> {
        Ok(self.entities.clone())
    }
}

#[derive(Default)]
struct StubLoader {
    loaded: Mutex<Vec<(String, usize)>>,
    entities: Vec<NerEntity>,
}

impl NerModelLoader for StubLoader {
    fn load(&self, model: &str, slot: &SlotId) -> Result<Box<dyn NerEngine>> {
        self.loaded.lock().unwrap().push((model.to_string(), slot.device));
        Ok(Box::new(StubEngine {
            entities: self.entities.clone(),
        }))
    }
}

struct CannedLlm(String);

impl LlmClient for CannedLlm {
    fn chat(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        assert!(user_prompt.starts_with("Text:\n"));
        Ok(self.0.clone())
    }
}

fn entity(label: &str, start: usize, end: usize) -> NerEntity {
    NerEntity {
        label: label.to_string(),
        start,
        end,
        score: None,
    }
}

mod pattern {
    use super::*;

    #[test]
    fn test_offsets_are_characters_for_cyrillic_text() {
        let text = "Телефон: +359 88 123 4567, имейл: petrov@abv.bg";
        let mut detector = PatternDetector::new();
        let spans = detector.detect(text, "bg").unwrap();

        let email = spans.iter().find(|s| s.label == EntityType::Email).unwrap();
        let chars: Vec<char> = text.chars().collect();
        let covered: String = chars[email.start..email.end].iter().collect();
        assert_eq!(covered, "petrov@abv.bg");
        assert_eq!(email.text_value, covered);

        let phone = spans.iter().find(|s| s.label == EntityType::Phone).unwrap();
        assert_eq!(phone.start, 9);
    }

    #[test]
    fn test_checksums() {
        let mut detector = PatternDetector::new();
        let valid = detector.detect("Card 4111 1111 1111 1111 on file", "en").unwrap();
        assert_eq!(valid[0].score, 1.0);

        let iban = detector.detect("IBAN: GB82 WEST 1234 5698 7654 32", "en").unwrap();
        assert!(iban.iter().any(|s| s.label == EntityType::Iban));

        let bad_iban = detector.detect("IBAN: GB00 WEST 1234 5698 7654 32", "en").unwrap();
        assert!(!bad_iban.iter().any(|s| s.label == EntityType::Iban));

        let ip = detector.detect("from 999.1.1.1 and 10.0.0.1", "en").unwrap();
        let ips: Vec<&str> = ip
            .iter()
            .filter(|s| s.label == EntityType::IpAddress)
            .map(|s| s.text_value.as_str())
            .collect();
        assert_eq!(ips, vec!["10.0.0.1"]);
    }
}

mod ner {
    use super::*;

    #[test]
    fn test_model_chosen_by_language_and_slot() {
        let loader = Arc::new(StubLoader::default());
        let factory = StandardDetectorFactory::new(PipelineConfig::default())
            .with_pattern(false)
            .with_ner(loader.clone());

        let detectors = factory.create(&SlotId::new(1, ResourceKind::Gpu), "bg").unwrap();
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].name(), "ner");
        assert_eq!(loader.loaded.lock().unwrap()[0], ("bg_news_trf".to_string(), 1));
    }

    #[test]
    fn test_missing_model_is_configuration_error() {
        let config = PipelineConfig::default();
        let factory = StandardDetectorFactory::new(config).with_ner(Arc::new(StubLoader::default()));
        let err = factory.create(&SlotId::new(0, ResourceKind::Cpu), "de").err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_pipeline_fuses_ner_and_pattern() {
        let text = "Jane Doe works at Acme Corp in Sofia, reach her at jane.doe@acme.com please.";
        let loader = Arc::new(StubLoader {
            loaded: Mutex::new(Vec::new()),
            entities: vec![
                entity("PERSON", 0, 8),
                entity("ORG", 18, 27),
                entity("GPE", 31, 36),
                entity("DATE", 0, 4),
                entity("PERSON", 70, 200),
            ],
        });
        let config = PipelineConfig::default();
        let factory = StandardDetectorFactory::new(config.clone()).with_ner(loader);
        let runner = PipelineRunner::new(config, Box::new(ScriptLanguageIdentifier), Box::new(factory)).unwrap();

        let out = runner.run(&Document::from_texts("d", [text])).unwrap();
        let page = &out.pages[0];
        assert_eq!(page.status, Some(PageStatus::Complete));

        let labels: Vec<(&str, &EntityType)> = page
            .detections
            .iter()
            .map(|s| (s.text_value.as_str(), &s.label))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("Jane Doe", &EntityType::Person),
                ("Acme Corp", &EntityType::Org),
                ("Sofia", &EntityType::Location),
                ("jane.doe@acme.com", &EntityType::Email),
            ]
        );
    }
}

mod llm {
    use super::*;

    #[test]
    fn test_fenced_response_finds_all_occurrences() {
        let response = "```json\n[{\"value\": \"Ivan\", \"type\": \"PERSON\"}]\n```";
        let mut detector = LlmDetector::new(Arc::new(CannedLlm(response.to_string())));
        let spans = detector.detect("Иван and Ivan, then Ivan again", "en").unwrap();

        let starts: Vec<usize> = spans.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![9, 20]);
        assert!(spans.iter().all(|s| s.score == 0.5 && s.source == "llm"));
    }

    /// Answers only when called with the expected system prompt.
    struct PromptCheckingLlm;

    impl LlmClient for PromptCheckingLlm {
        fn chat(&self, system_prompt: &str, _user_prompt: &str) -> Result<String> {
            if system_prompt == "List names as JSON." {
                Ok(r#"[{"value": "Petar", "type": "PERSON"}]"#.to_string())
            } else {
                Ok("[]".to_string())
            }
        }
    }

    #[test]
    fn test_factory_applies_custom_prompt() {
        let factory = StandardDetectorFactory::new(PipelineConfig::default())
            .with_pattern(false)
            .with_llm(Arc::new(PromptCheckingLlm))
            .with_llm_prompt("List names as JSON.");
        let mut detectors = factory.create(&SlotId::new(0, ResourceKind::Cpu), "en").unwrap();
        let spans = detectors[0].detect("Petar is here", "en").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text_value, "Petar");
    }

    #[test]
    fn test_malformed_output_degrades_page_only() {
        let config = PipelineConfig::default();
        let factory = StandardDetectorFactory::new(config.clone())
            .with_llm(Arc::new(CannedLlm("Sure! Here is what I found: Jane".to_string())));
        let runner = PipelineRunner::new(config, Box::new(ScriptLanguageIdentifier), Box::new(factory)).unwrap();

        let text = "Write to jane@example.com for the full report on the quarterly numbers.";
        let out = runner.run(&Document::from_texts("d", [text])).unwrap();
        let page = &out.pages[0];

        assert_eq!(page.status, Some(PageStatus::Degraded));
        assert_eq!(page.detections.len(), 1);
        assert_eq!(page.detections[0].source, "pattern");
    }
}
