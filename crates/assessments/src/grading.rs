//! Answer checking and attempt scoring
//!
//! All or nothing per question. Short answers are compared after trimming,
//! ignoring ASCII case; there is no fuzzy matching.

use std::collections::{HashMap, HashSet};

use crate::model::{
    AnswerKey, Assessment, AttemptResult, Question, QuestionResponse, QuestionResult, Response,
};

/// Whether `response` answers `question` correctly.
///
/// A response of a different kind than the question is incorrect.
pub fn check_answer(question: &Question, response: &Response) -> bool {
    match (&question.answer_key, response) {
        (AnswerKey::MultipleChoice { correct_option_id }, Response::MultipleChoice(selected)) => {
            selected == correct_option_id
        }
        (AnswerKey::TrueFalse { correct }, Response::TrueFalse(answer)) => answer == correct,
        (AnswerKey::MultipleAnswer { correct_option_ids }, Response::MultipleAnswer(selected)) => {
            let expected: HashSet<&str> = correct_option_ids.iter().map(String::as_str).collect();
            let given: HashSet<&str> = selected.iter().map(String::as_str).collect();
            expected == given
        }
        (AnswerKey::ShortAnswer { accepted_answers }, Response::ShortAnswer(text)) => {
            let text = text.trim();
            accepted_answers
                .iter()
                .any(|accepted| accepted.trim().eq_ignore_ascii_case(text))
        }
        _ => false,
    }
}

/// Grade every question of `assessment`. Unanswered questions are incorrect;
/// if a question is answered more than once the first response counts.
pub fn score_attempt(assessment: &Assessment, responses: &[QuestionResponse]) -> AttemptResult {
    let mut by_question: HashMap<&str, &Response> = HashMap::new();
    for r in responses {
        by_question
            .entry(r.question_id.as_str())
            .or_insert(&r.response);
    }

    let results: Vec<QuestionResult> = assessment
        .questions
        .iter()
        .map(|question| QuestionResult {
            question_id: question.id.clone(),
            correct: by_question
                .get(question.id.as_str())
                .map(|response| check_answer(question, response))
                .unwrap_or(false),
        })
        .collect();

    let total = results.len();
    let correct = results.iter().filter(|r| r.correct).count();

    AttemptResult {
        assessment_id: assessment.id.clone(),
        correct,
        total,
        score: percentage(correct, total),
        results,
    }
}

fn percentage(correct: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = correct as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, answer_key: AnswerKey) -> Question {
        Question {
            id: id.to_string(),
            prompt: format!("Question {}", id),
            options: Vec::new(),
            answer_key,
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_multiple_choice() {
        let q = question(
            "q1",
            AnswerKey::MultipleChoice {
                correct_option_id: "b".to_string(),
            },
        );
        assert!(check_answer(&q, &Response::MultipleChoice("b".to_string())));
        assert!(!check_answer(&q, &Response::MultipleChoice("B".to_string())));
    }

    #[test]
    fn test_true_false() {
        let q = question("q1", AnswerKey::TrueFalse { correct: false });
        assert!(check_answer(&q, &Response::TrueFalse(false)));
        assert!(!check_answer(&q, &Response::TrueFalse(true)));
    }

    #[test]
    fn test_multiple_answer_is_set_equality() {
        let q = question(
            "q1",
            AnswerKey::MultipleAnswer {
                correct_option_ids: strings(&["a", "c"]),
            },
        );
        assert!(check_answer(&q, &Response::MultipleAnswer(strings(&["c", "a"]))));
        assert!(check_answer(&q, &Response::MultipleAnswer(strings(&["a", "c", "a"]))));
        // Subsets and supersets earn nothing
        assert!(!check_answer(&q, &Response::MultipleAnswer(strings(&["a"]))));
        assert!(!check_answer(&q, &Response::MultipleAnswer(strings(&["a", "b", "c"]))));
    }

    #[test]
    fn test_short_answer_normalisation() {
        let q = question(
            "q1",
            AnswerKey::ShortAnswer {
                accepted_answers: strings(&["Paris", "paris, france"]),
            },
        );
        assert!(check_answer(&q, &Response::ShortAnswer("  PARIS ".to_string())));
        assert!(check_answer(&q, &Response::ShortAnswer("Paris, France".to_string())));
        assert!(!check_answer(&q, &Response::ShortAnswer("Pari".to_string())));
    }

    #[test]
    fn test_mismatched_kind_is_incorrect() {
        let q = question("q1", AnswerKey::TrueFalse { correct: true });
        assert!(!check_answer(&q, &Response::ShortAnswer("true".to_string())));
    }

    #[test]
    fn test_score_rounds_to_two_decimals() {
        let assessment = Assessment {
            id: "a1".to_string(),
            title: "Thirds".to_string(),
            questions: vec![
                question("q1", AnswerKey::TrueFalse { correct: true }),
                question("q2", AnswerKey::TrueFalse { correct: true }),
                question("q3", AnswerKey::TrueFalse { correct: true }),
            ],
        };
        let responses = vec![
            QuestionResponse {
                question_id: "q1".to_string(),
                response: Response::TrueFalse(true),
            },
            QuestionResponse {
                question_id: "q2".to_string(),
                response: Response::TrueFalse(false),
            },
            // First response wins
            QuestionResponse {
                question_id: "q1".to_string(),
                response: Response::TrueFalse(false),
            },
        ];

        let result = score_attempt(&assessment, &responses);
        assert_eq!(result.correct, 1);
        assert_eq!(result.total, 3);
        assert_eq!(result.score, 33.33);
        assert!(!result.results[2].correct);
    }

    #[test]
    fn test_empty_assessment_scores_zero() {
        let assessment = Assessment {
            id: "a0".to_string(),
            title: "Empty".to_string(),
            questions: Vec::new(),
        };
        let result = score_attempt(&assessment, &[]);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.total, 0);
    }
}
