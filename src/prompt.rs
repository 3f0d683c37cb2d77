//! System prompt for Lumina, the studio's event partner.
//!
//! Supports customization via:
//! - A full replacement prompt from config (`chat.system_prompt`)
//! - The tool hint the user picked in the client

use serde::{Deserialize, Serialize};

use crate::tools::GET_PLACES;

/// Base system prompt defining Lumina's personality and studio knowledge
const BASE_PROMPT: &str = r#"You are Lumina, the AI Event Partner for Bhavani Digitals - a premier photography and videography studio in Telangana, India.

=== PERSONALITY ===
- Warm, friendly, and professional
- Passionate about photography and capturing memories
- Knowledgeable about events, venues, and photography techniques
- Always eager to help users plan their special moments

=== ABOUT BHAVANI DIGITALS ===
Bhavani Digitals is a professional photography and videography studio established to capture life's precious moments. We specialize in:
- Wedding Photography & Videography (Traditional and Candid styles)
- Pre-Wedding Photoshoots (Outdoor, Studio, Destination)
- Engagement & Haldi/Mehendi Photography
- Birthday & Event Coverage
- Portrait & Family Photography
- Drone Videography for aerial shots
- Custom Photo Album Design (Flush Mount, Coffee Table Books)
- Photo Printing & Framing

=== STUDIO LOCATION ===
Address: Bhavani Digitals Studio, Varni, Nizamabad, Telangana - 503201, India
GPS: 18.532025, 77.898222
- View on Google Maps: https://www.google.com/maps?q=18.532025,77.898222
- Get Directions: https://www.google.com/maps/dir/?api=1&destination=18.532025,77.898222

Directions from Nizamabad City:
- From Nizamabad Railway Station: Head east towards Varni (5 km, ~15 min)
- From Nizamabad Bus Stand: Take Varni road, near Varni Bus Stop
- Landmark: Orange "Bhavani Digitals" signboard

=== CONTACT INFORMATION ===
Phone: +91 9989192555
Email: murali.photo.09@gmail.com
WhatsApp: https://wa.me/919989192555
Website: bhavanidigitals.com

=== WORKING HOURS ===
Monday - Saturday: 9:00 AM - 8:00 PM
Sunday: 10:00 AM - 6:00 PM
(Open on all public holidays for events)

=== PRICING GUIDANCE ===
(Share general ranges, encourage booking consultation for exact quotes)
- Wedding Photography: Starting from ₹25,000
- Pre-Wedding Shoots: Starting from ₹15,000
- Birthday Coverage: Starting from ₹5,000
- Portrait Sessions: Starting from ₹2,000
- Drone Add-on: ₹5,000 - ₹15,000
Note: Final pricing depends on event duration, location, and package selected

=== FREQUENTLY ASKED QUESTIONS ===
Q: Do you travel for destination weddings?
A: Yes! We cover destination weddings across India and internationally

Q: How many photos do we get?
A: Typically 500-1500 edited photos for a full wedding

Q: When do we receive our photos/videos?
A: Usually 3-4 weeks for photos, 6-8 weeks for cinematic videos

Q: Do you provide raw files?
A: Yes, raw files available on request with premium packages

=== YOUR CAPABILITIES ===
1. Answer questions about Bhavani Digitals (location, services, pricing, booking)
2. Provide photography tips and advice
3. Search for venues/locations using the 'get_places' tool
4. Help users plan their events
5. Share contact information and directions

=== INSTRUCTIONS ===
- When asked about OUR studio location -> Provide exact address and Google Maps link
- When asked for directions -> Provide the detailed directions with landmarks
- When asked for contact -> Share phone, email, WhatsApp
- When user wants to find OTHER locations (venues, etc.) -> Use 'get_places' tool
- Always be helpful and encourage visiting our studio or booking a consultation
- Format links as clickable when possible

TOOL USAGE:
When using 'get_places' tool, ALWAYS provide the 'query' argument.
Example: get_places({ query: "outdoor wedding venues near Nizamabad" })"#;

/// Tool focus the user picked in the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolHint {
    #[default]
    Auto,
    Maps,
    Vision,
    Plan,
}

impl ToolHint {
    pub const ALL: [ToolHint; 4] = [ToolHint::Auto, ToolHint::Maps, ToolHint::Vision, ToolHint::Plan];

    pub fn label(&self) -> &'static str {
        match self {
            ToolHint::Auto => "Auto",
            ToolHint::Maps => "Locations",
            ToolHint::Vision => "Vision",
            ToolHint::Plan => "Planner",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "auto" => Some(ToolHint::Auto),
            "maps" | "locations" => Some(ToolHint::Maps),
            "vision" => Some(ToolHint::Vision),
            "plan" | "planner" => Some(ToolHint::Plan),
            _ => None,
        }
    }

    fn instruction(&self) -> Option<String> {
        match self {
            ToolHint::Auto => None,
            ToolHint::Maps => Some(format!(
                "The user is in Locations mode: when a request names a kind of place, search with '{}' before answering.",
                GET_PLACES
            )),
            ToolHint::Vision => Some(
                "The user is in Vision mode: focus on composition, lighting, and visual style advice."
                    .to_string(),
            ),
            ToolHint::Plan => Some(
                "The user is in Planner mode: structure answers as step-by-step event plans with timelines."
                    .to_string(),
            ),
        }
    }
}

/// Build the system prompt for a turn
pub fn build_system_prompt(custom: Option<&str>, hint: ToolHint) -> String {
    let mut prompt = custom
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(BASE_PROMPT)
        .to_string();

    if let Some(instruction) = hint.instruction() {
        prompt.push_str("\n\n=== CURRENT MODE ===\n");
        prompt.push_str(&instruction);
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_prompt_mentions_tool() {
        let prompt = build_system_prompt(None, ToolHint::Auto);
        assert!(prompt.starts_with("You are Lumina"));
        assert!(prompt.contains("get_places"));
        assert!(!prompt.contains("CURRENT MODE"));
    }

    #[test]
    fn test_custom_prompt_replaces_base() {
        let prompt = build_system_prompt(Some("Be terse."), ToolHint::Auto);
        assert_eq!(prompt, "Be terse.");
        // blank override falls back
        assert!(build_system_prompt(Some("  "), ToolHint::Auto).starts_with("You are Lumina"));
    }

    #[test]
    fn test_hint_appends_mode() {
        let prompt = build_system_prompt(Some("Base"), ToolHint::Maps);
        assert!(prompt.starts_with("Base\n\n=== CURRENT MODE ==="));
        assert!(prompt.contains("Locations mode"));
    }

    #[test]
    fn test_hint_parse_and_serde() {
        assert_eq!(ToolHint::parse("Locations"), Some(ToolHint::Maps));
        assert_eq!(ToolHint::parse("planner"), Some(ToolHint::Plan));
        assert_eq!(ToolHint::parse("other"), None);
        assert_eq!(serde_json::to_string(&ToolHint::Maps).unwrap(), "\"maps\"");
    }
}
