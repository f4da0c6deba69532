mod admin;
mod deliveries;
mod health_check;
