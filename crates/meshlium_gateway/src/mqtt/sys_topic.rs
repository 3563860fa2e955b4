/// Subscription filters for broker client presence notifications.
pub const CLIENT_CONNECTED_FILTER: &str = "$SYS/brokers/+/clients/+/connected";
pub const CLIENT_DISCONNECTED_FILTER: &str = "$SYS/brokers/+/clients/+/disconnected";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPresence {
    Connected(String),
    Disconnected(String),
}

/// Parses `$SYS/brokers/{node}/clients/{client_id}/(connected|disconnected)`.
pub fn parse_presence_topic(topic: &str) -> Option<ClientPresence> {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        ["$SYS", "brokers", _, "clients", client_id, state] if !client_id.is_empty() => {
            match *state {
                "connected" => Some(ClientPresence::Connected(client_id.to_string())),
                "disconnected" => Some(ClientPresence::Disconnected(client_id.to_string())),
                _ => None,
            }
        }
        _ => None,
    }
}
