use serde_json::{Map, Value};

/// One sequential step of the task: a name for logs and the natural-language
/// instruction handed to the agent.
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: String,
    pub task: String,
}

impl Phase {
    pub fn new(name: &str, task: String) -> Self {
        Self {
            name: name.to_string(),
            task,
        }
    }
}

/// Everything one run needs, constructed once per invocation and threaded
/// through the orchestrator. No process-wide state.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub profile: Map<String, Value>,
    pub website_url: String,
    pub phases: Vec<Phase>,
}

impl TaskConfig {
    /// The standard two-phase demo-booking task: open the target page, then
    /// drive the booking workflow with the caller's profile.
    pub fn demo_booking(profile: Map<String, Value>, website_url: &str) -> Self {
        let profile_json = Value::Object(profile.clone()).to_string();

        let opener = Phase::new("opener", format!("Open the webpage {}", website_url));

        let booker = Phase::new(
            "booker",
            format!(
                "On the {website_url} webpage, find and select the button that schedules a product demo.\n\
                 Select the first available demo time.\n\
                 Fill out the appointment with the following profile:\n\
                 {profile}\n\n\
                 If any fields required to book a demo are missing from the profile, call 'report_required_fields' and end the execution.\n\
                 Do NOT GUESS ANY FIELDS. THIS WILL RESULT IN A FAILED BOOKING. DO NOT USE 'John Doe' or 'test@test.com'. \
                 **If you cannot find the required fields**, call 'report_required_fields'.\n\
                 If there are missing fields and you have reported them, do NOT book a demo. Instead, end the execution.\n\n\
                 If all required fields are present, call 'report_outcome' BEFORE ending the execution once the demo has been booked. \
                 Without calling 'report_outcome', the user will not know that the demo has been booked.",
                website_url = website_url,
                profile = profile_json,
            ),
        );

        Self {
            profile,
            website_url: website_url.to_string(),
            phases: vec![opener, booker],
        }
    }
}
