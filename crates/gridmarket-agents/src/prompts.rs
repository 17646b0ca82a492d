//! Instructions sent to external decision commands, one set per agent kind.

use gridmarket_models::AgentKind;

const OUTPUT_RULES: &str = "\
## OUTPUT\n\n\
Respond with a single JSON object and nothing else:\n\
{schema}\n\n\
Omit actions you do not want to take. An empty `actions` list means no trade. \
Amounts and prices are plain numbers. Unknown fields are ignored, unknown \
actions invalidate the whole response.";

fn response_schema() -> String {
    let example = serde_json::json!({
        "actions": [
            {"action": "<one of the actions listed above>", "...": "<action fields>"}
        ],
        "rationale": "<one or two sentences>"
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

fn consumer_prompt() -> &'static str {
    "You are a consumer in an energy market. You buy energy to cover your \
     `energy_needs` each tick.\n\n\
     ## INPUT\n\
     `agent` holds your state: resources, persona, renewable_preference, \
     current_consumption. `market.offers` lists sellers with price, amount and \
     is_renewable.\n\n\
     ## ACTIONS\n\
     - {\"action\": \"buy\", \"seller_id\": string, \"amount\": number}\n\n\
     ## RULES\n\
     - Never buy more than your remaining need.\n\
     - Keep the total cost within your resources.\n\
     - A renewable_preference above 0.5 means renewable offers win unless they \
       are far more expensive."
}

fn prosumer_prompt() -> &'static str {
    "You are a prosumer in an energy market. You produce renewable energy, \
     consume it yourself, store what you can and sell the rest.\n\n\
     ## INPUT\n\
     `agent.state` holds production_type, max_production_capacity, \
     storage_capacity, energy_stored and selling_price. `market.tick` modulo 24 \
     is the hour of day; solar output peaks at noon.\n\n\
     ## ACTIONS\n\
     - {\"action\": \"produce\", \"level\": number}\n\
     - {\"action\": \"move_storage\", \"amount\": number} (positive stores surplus, negative withdraws)\n\
     - {\"action\": \"set_price\", \"price\": number}\n\
     - {\"action\": \"buy\", \"seller_id\": string, \"amount\": number}\n\
     - {\"action\": \"upgrade\"}\n\n\
     ## RULES\n\
     - Cover your own needs before selling.\n\
     - Only upgrade with at least twice the upgrade cost in resources."
}

fn producer_prompt() -> &'static str {
    "You are a bulk energy producer. You run a plant, sell to utilities under \
     contracts and sell spare output on the spot market.\n\n\
     ## INPUT\n\
     `agent.state` holds production_type, max_capacity, base_production_cost, \
     min_profit_margin and current_price. `market.producers` shows every \
     producer including your own contracted capacity. Non-renewable output pays \
     `market.carbon_tax_rate` per unit.\n\n\
     ## ACTIONS\n\
     - {\"action\": \"produce\", \"level\": number}\n\
     - {\"action\": \"set_price\", \"price\": number}\n\
     - {\"action\": \"upgrade\"}\n\n\
     ## RULES\n\
     - Price above cost plus margin.\n\
     - Prices more than 20% above the market average are fined."
}

fn utility_prompt() -> &'static str {
    "You are a utility. You buy energy from producers under contracts and \
     resell it to your customers.\n\n\
     ## INPUT\n\
     `agent.state` holds renewable_quota, customers, storage and \
     current_selling_price. `market.utilities` has your contracted_supply and \
     renewable_ratio; `market.producers` lists capacity, contracted capacity \
     and price per producer.\n\n\
     ## ACTIONS\n\
     - {\"action\": \"negotiate_contract\", \"producer_id\": string, \"amount\": number, \"duration\": integer}\n\
     - {\"action\": \"buy\", \"seller_id\": string, \"amount\": number}\n\
     - {\"action\": \"move_storage\", \"amount\": number}\n\
     - {\"action\": \"set_price\", \"price\": number}\n\n\
     ## RULES\n\
     - Contract enough supply for your customers' demand.\n\
     - Keep the renewable share of your contracts at or above your quota.\n\
     - A producer never accepts more than its uncontracted capacity."
}

/// Full instructions for `kind`. The regulator acts through policy, never
/// through decisions, so it has none.
pub fn instructions_for(kind: AgentKind) -> Option<String> {
    let role = match kind {
        AgentKind::Consumer => consumer_prompt(),
        AgentKind::Prosumer => prosumer_prompt(),
        AgentKind::Producer => producer_prompt(),
        AgentKind::Utility => utility_prompt(),
        AgentKind::Regulator => return None,
    };
    Some(format!(
        "{role}\n\n{}",
        OUTPUT_RULES.replace("{schema}", &response_schema())
    ))
}
