use chrono::Local;
use dtalks_core::{Situation, SituationProvider};
use std::sync::Arc;
use tracing::warn;

/// Small-talk prompt coloured with the current time and weather
pub struct SmalltalkPrompt {
    situation: Option<Arc<dyn SituationProvider>>,
}

impl SmalltalkPrompt {
    pub fn new(situation: Option<Arc<dyn SituationProvider>>) -> Self {
        Self { situation }
    }

    async fn situation(&self) -> Situation {
        let Some(provider) = &self.situation else {
            return Situation::fallback(Local::now());
        };
        match provider.current().await {
            Ok(situation) => situation,
            Err(e) => {
                warn!(error = %e, "Situation lookup failed, using defaults");
                Situation::fallback(Local::now())
            }
        }
    }

    pub async fn build(&self, question: &str) -> String {
        render(&self.situation().await, question)
    }
}

fn render(situation: &Situation, question: &str) -> String {
    format!(
        r#"You are a chatbot that answers users' everyday questions (such as weather, lunch, mood, etc.) in a friendly, conversational style, like a real friend.
Use real weather and time information to naturally add a sense of season or atmosphere to your responses.
Time is {now}, and the user's estimated location is "{location}".
The current temperature is {temp}°C, 1-hour rainfall is {rain}mm, and humidity is {humidity}%.
The company is located at 235, Pangyoyeok-ro, Bundang-gu, Seongnam-si, Gyeonggi-do, H Square N-dong.

The user's question is: "{question}"
Match the user's question language, but refer to the above information flexibly."#,
        now = situation.now.format("%Y-%m-%d %H:%M:%S"),
        location = situation.location,
        temp = situation.temperature,
        rain = situation.rainfall,
        humidity = situation.humidity,
        question = question,
    )
}
