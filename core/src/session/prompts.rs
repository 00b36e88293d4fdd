use super::KnownValues;
use crate::completion::Message;
use crate::schema::MandatoryFields;

const UPDATE_PREAMBLE: &str = "You are an iterative data completion assistant. \
You will receive a JSON object containing the values known so far (null marks a missing value) \
and a user message that includes updates or new data. \
Carefully analyze the user's message, extract the relevant information and update the object accordingly. \
Treat the message as an update or correction of the existing values. \
Ensure the updated object is accurate and reflects all new data provided by the user.";

const QUESTIONS_PREAMBLE: &str = "You are a world class conversational algorithm to ask questions about missing data values. \
You are going to receive a JSON object where some values are null, indicating missing information. \
For every key whose value is null, write one natural follow-up question asking the user for it, \
and set `field` to that exact key. Only ask about the mandatory keys you are given.";

pub(crate) fn initial_extraction(message: &str) -> Vec<Message> {
    vec![Message::User(message.to_string())]
}

pub(crate) fn update_extraction(known: &KnownValues, message: &str) -> Vec<Message> {
    vec![
        Message::Preamble(UPDATE_PREAMBLE.to_string()),
        Message::User(format!("current values: {}", known.to_json())),
        Message::User(format!("message: {message}")),
    ]
}

pub(crate) fn follow_up(known: &KnownValues, mandatory: &MandatoryFields) -> Vec<Message> {
    vec![
        Message::Preamble(QUESTIONS_PREAMBLE.to_string()),
        Message::User(known.to_json().to_string()),
        Message::User(format!(
            "mandatory keys: {}",
            mandatory.iter().collect::<Vec<_>>().join(", ")
        )),
    ]
}
