pub mod answer;
pub mod diagnosis;
pub mod loaders;
pub mod question;
pub mod session;
pub mod solve;
pub mod store;
pub mod taxonomy;

pub use answer::AnswerRecord;
pub use diagnosis::{
    AttemptVerdict, CombinedExplanation, ContrastiveAnalysis, ContrastivePayload,
    DiagnosisPayload, DiagnosisResult, DiagnosisVerdict, DirectPayload, HintStep, Misconception,
    OptionNote, ScaffoldState, ScaffoldedPayload, TutorMode, Verdict,
};
pub use loaders::{load_answer_file, PresetAnswer};
pub use question::{ProblemType, Question, QuestionSource, Subject, UncertainSpan};
pub use session::{
    RunMode, ScaffoldSummary, SessionHeader, SessionResult, SessionSummary, TranscriptionInfo,
};
pub use solve::{SolveResult, SolveSource};
pub use store::{QuestionEntry, QuestionStatus, QuestionStore};
