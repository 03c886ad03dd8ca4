pub mod health_dto;
pub mod resolve_dto;
